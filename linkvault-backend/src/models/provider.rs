use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Netdisk providers recognised by the catalog.
///
/// Variant order is classification priority: when heuristic keywords for two
/// providers both appear, the earlier variant wins. The serialized names are
/// the keys stored in the `links` JSON column.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Provider {
    #[serde(rename = "quark")]
    #[strum(serialize = "quark")]
    Quark,
    #[serde(rename = "aliyun")]
    #[strum(to_string = "aliyun", serialize = "alipan")]
    Aliyun,
    #[serde(rename = "baidu")]
    #[strum(serialize = "baidu")]
    Baidu,
    #[serde(rename = "115")]
    #[strum(serialize = "115")]
    Pan115,
    #[serde(rename = "xunlei")]
    #[strum(to_string = "xunlei", serialize = "thunder")]
    Xunlei,
    #[serde(rename = "uc")]
    #[strum(serialize = "uc")]
    Uc,
    #[serde(rename = "123pan")]
    #[strum(to_string = "123pan", serialize = "123")]
    Pan123,
    #[serde(rename = "tianyi")]
    #[strum(to_string = "tianyi", serialize = "189")]
    Tianyi,
    #[serde(rename = "caiyun")]
    #[strum(to_string = "caiyun", serialize = "139")]
    Caiyun,
    #[serde(rename = "other")]
    #[strum(serialize = "other")]
    Other,
}

impl Provider {
    /// Stable storage key (same as the serde name)
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Lenient lookup used for rule configuration and CLI flags
    pub fn from_name(name: &str) -> Option<Provider> {
        name.trim().parse().ok()
    }
}

/// Provider-keyed link set of a single parsed message.
pub type LinkMap = BTreeMap<Provider, String>;
