use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static MOBILE_UA_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)android|webos|iphone|ipad|ipod|blackberry|iemobile|opera mini|mobile").unwrap()
});

/// Widest viewport, in CSS pixels, still considered a phone or small tablet.
pub const MOBILE_MAX_VIEWPORT: u32 = 768;

/// What the host environment reports about the client device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub user_agent: String,
    pub touch_points: u32,
    pub viewport_width: u32,
}

impl DeviceInfo {
    pub fn desktop() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string(),
            touch_points: 0,
            viewport_width: 1920,
        }
    }

    pub fn mobile() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1".to_string(),
            touch_points: 5,
            viewport_width: 390,
        }
    }

    pub fn classify(&self) -> DeviceClass {
        DeviceClass::classify(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

impl DeviceClass {
    /// A device is mobile when it has a touch screen and a small viewport, or when its
    /// user agent carries a mobile signature. Either signal alone is enough.
    pub fn classify(info: &DeviceInfo) -> Self {
        let small_touch = info.touch_points > 0 && info.viewport_width <= MOBILE_MAX_VIEWPORT;
        if small_touch || MOBILE_UA_REGEX.is_match(&info.user_agent) {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }

    pub fn is_mobile(&self) -> bool {
        matches!(self, DeviceClass::Mobile)
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Desktop => write!(f, "desktop"),
            DeviceClass::Mobile => write!(f, "mobile"),
        }
    }
}
