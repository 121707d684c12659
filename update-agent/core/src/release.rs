//! Release records as published by the GL.iNet firmware api.
//!
//! The api answers `GET /cloud-api/model/info?model=<model>` with a document of the shape
//!
//! ```json
//! {
//!   "info": [
//!     {
//!       "version": "4.6.8",
//!       "stage": "SNAPSHOT",
//!       "release_note": "<p>...</p>",
//!       "download": [
//!         {
//!           "name": "openwrt-mt6000-4.6.8-0119-1705635561.bin",
//!           "link": "https://fw.gl-inet.com/firmware/mt6000/snapshot/...bin",
//!           "sha256": "8c1f...",
//!           "size": 29884416,
//!           "compile_time": 1705635561
//!         }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Only the first entry of `download` is considered; it is the sysupgrade image.
//! [`select`] turns the raw body into a validated [`ReleaseDescriptor`].
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::BuildId;

/// Length of a hex encoded sha256 digest.
pub const SHA256_HEX_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed deserializing release response from json")]
    Decode(#[source] crate::json::Error),
    #[error("release response does not contain an `info` collection")]
    MissingInfo,
    #[error("release record `info[{index}]` for channel `{channel}` is malformed")]
    MalformedRecord {
        channel: String,
        index: usize,
        #[source]
        source: crate::json::Error,
    },
    #[error("no release record for channel `{channel}`; channels present: [{}]", .seen.join(", "))]
    NoMatchingChannel { channel: String, seen: Vec<String> },
    #[error("release record for channel `{channel}` is missing required field `{field}`")]
    MissingField {
        channel: String,
        field: &'static str,
    },
    #[error("release record for channel `{channel}` has invalid field `{field}`: {reason}")]
    InvalidField {
        channel: String,
        field: &'static str,
        reason: String,
    },
    #[error("release record for channel `{channel}` has invalid build id `{value}`")]
    InvalidBuildId { channel: String, value: String },
}

impl Error {
    fn missing(channel: &str, field: &'static str) -> Self {
        Self::MissingField {
            channel: channel.to_owned(),
            field,
        }
    }

    fn invalid(channel: &str, field: &'static str, reason: impl ToString) -> Self {
        Self::InvalidField {
            channel: channel.to_owned(),
            field,
            reason: reason.to_string(),
        }
    }
}

/// Top level document returned by the model info endpoint.
///
/// Records stay untyped until their `stage` is known to match; other channels are never decoded.
#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub info: Option<Vec<Value>>,
}

/// One firmware release on one channel.
///
/// Missing fields are reported by [`ReleaseDescriptor::from_record`] with the field name rather
/// than as a decode error.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FirmwareRecord {
    #[serde(default)]
    pub version: Option<String>,
    /// The channel tag, e.g. `RELEASE`, `TESTING` or `SNAPSHOT`.
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub release_note: Option<String>,
    #[serde(default)]
    pub download: Vec<DownloadInfo>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DownloadInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    /// Either a json number or a numeric string, depending on the api version.
    #[serde(default)]
    pub size: Option<Value>,
    /// Either a json number or a numeric string, depending on the api version.
    #[serde(default)]
    pub compile_time: Option<Value>,
}

/// A validated release on the target channel.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ReleaseDescriptor {
    pub channel: String,
    pub version: String,
    pub build_id: BuildId,
    pub download_url: Url,
    /// Lowercase hex sha256 of the image.
    pub checksum: String,
    pub size_bytes: Option<u64>,
    pub file_name: Option<String>,
}

impl ReleaseDescriptor {
    /// Validates `record`, which must already be known to belong to `channel`.
    pub fn from_record(channel: &str, record: &FirmwareRecord) -> Result<Self, Error> {
        let version = non_empty(record.version.as_deref())
            .ok_or_else(|| Error::missing(channel, "version"))?
            .to_owned();

        let download = record
            .download
            .first()
            .ok_or_else(|| Error::missing(channel, "download"))?;

        let build_id = match &download.compile_time {
            None | Some(Value::Null) => {
                return Err(Error::missing(channel, "download[0].compile_time"));
            }
            Some(value) => parse_build_id(value).ok_or_else(|| Error::InvalidBuildId {
                channel: channel.to_owned(),
                value: value.to_string(),
            })?,
        };

        let link = non_empty(download.link.as_deref())
            .ok_or_else(|| Error::missing(channel, "download[0].link"))?;
        let download_url =
            Url::parse(link).map_err(|e| Error::invalid(channel, "download[0].link", e))?;

        let checksum = non_empty(download.sha256.as_deref())
            .ok_or_else(|| Error::missing(channel, "download[0].sha256"))?;
        let checksum = normalize_sha256(checksum).ok_or_else(|| {
            Error::invalid(
                channel,
                "download[0].sha256",
                format!("expected {SHA256_HEX_LEN} hex characters, got `{checksum}`"),
            )
        })?;

        let size_bytes = match &download.size {
            None | Some(Value::Null) => None,
            Some(value) => {
                let size = parse_u64(value);
                if size.is_none() {
                    warn!(
                        "ignoring unusable image size `{value}` for channel `{channel}`; the \
                         free space check will be skipped"
                    );
                }
                size
            }
        };

        Ok(Self {
            channel: channel.to_owned(),
            version,
            build_id,
            download_url,
            checksum,
            size_bytes,
            file_name: non_empty(download.name.as_deref()).map(ToOwned::to_owned),
        })
    }
}

/// Extracts the release for `channel` from the raw api response.
///
/// Channel names are compared exactly. If more than one record carries the channel, the first
/// one in document order is used.
pub fn select(raw: &str, channel: &str) -> Result<ReleaseDescriptor, Error> {
    let model_info: ModelInfo =
        crate::json::deserialize(raw.as_bytes()).map_err(Error::Decode)?;
    let records = model_info.info.ok_or(Error::MissingInfo)?;
    debug!("release response lists {} records", records.len());

    let mut matching = records
        .iter()
        .enumerate()
        .filter(|(_, record)| stage(record) == Some(channel));
    let Some((index, record)) = matching.next() else {
        let seen = records
            .iter()
            .filter_map(|record| stage(record).map(ToOwned::to_owned))
            .collect();
        return Err(Error::NoMatchingChannel {
            channel: channel.to_owned(),
            seen,
        });
    };

    let ignored = matching.count();
    if ignored > 0 {
        warn!(
            "release response lists {} records for channel `{channel}`; using the first one",
            ignored + 1,
        );
    }

    let record: FirmwareRecord =
        crate::json::from_value(record).map_err(|source| Error::MalformedRecord {
            channel: channel.to_owned(),
            index,
            source,
        })?;
    ReleaseDescriptor::from_record(channel, &record)
}

fn stage(record: &Value) -> Option<&str> {
    record.get("stage").and_then(Value::as_str)
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse::<BuildId>().ok().map(BuildId::get),
        _ => None,
    }
}

fn parse_build_id(value: &Value) -> Option<BuildId> {
    parse_u64(value).map(BuildId::new)
}

fn normalize_sha256(hex: &str) -> Option<String> {
    (hex.len() == SHA256_HEX_LEN && hex.bytes().all(|b| b.is_ascii_hexdigit()))
        .then(|| hex.to_ascii_lowercase())
}
