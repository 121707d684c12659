use std::io;

use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Deserializer, Value};

pub type Error = serde_path_to_error::Error<serde_json::Error>;

/// Deserializes json, recording the path to the offending field on failure.
pub fn deserialize<'de, R, T>(reader: R) -> Result<T, Error>
where
    R: io::Read,
    T: Deserialize<'de>,
{
    let json_deserializer = &mut Deserializer::from_reader(reader);
    serde_path_to_error::deserialize(json_deserializer)
}

/// Like [`deserialize`], for json that was already parsed into a [`Value`].
pub fn from_value<T>(value: &Value) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    serde_path_to_error::deserialize(value)
}
