use crate::error::{ErrorCode, ScopesError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

pub type VariantMap = BTreeMap<String, serde_json::Value>;

pub fn to_variant_map<T: Serialize>(value: &T) -> Result<VariantMap, ScopesError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(object)) => Ok(object.into_iter().collect()),
        Ok(other) => Err(ScopesError::new(
            ErrorCode::InvalidArgument,
            format!("expected an object, got {other}"),
        )),
        Err(err) => Err(ScopesError::new(
            ErrorCode::InvalidArgument,
            format!("serialize variant map failed: {err}"),
        )),
    }
}

pub fn from_variant_map<T: DeserializeOwned>(map: VariantMap) -> Result<T, ScopesError> {
    let object = map.into_iter().collect::<serde_json::Map<_, _>>();
    serde_json::from_value(serde_json::Value::Object(object)).map_err(|err| {
        ScopesError::new(
            ErrorCode::InvalidArgument,
            format!("deserialize variant map failed: {err}"),
        )
    })
}
