use thiserror::Error;

/// Errors surfaced by the tessellation, placement and terrain stages
#[derive(Debug, Error)]
pub enum Error {
    #[error("triangulation failed: {0}")]
    Triangulation(String),

    #[error("GPU resource error: {0}")]
    Gpu(String),

    #[error("invalid layer: {0}")]
    InvalidLayer(String),

    #[error("unknown style property: {0}")]
    UnknownProperty(String),

    #[error("terrain source misconfigured: {0}")]
    TerrainSource(String),

    #[error("tile {0} not found")]
    TileNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for wasm_bindgen::JsValue {
    fn from(err: Error) -> Self {
        wasm_bindgen::JsValue::from_str(&err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::TerrainSource("dem is not raster-dem".to_string());
        assert_eq!(err.to_string(), "terrain source misconfigured: dem is not raster-dem");

        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = parse_err.into();
        match err {
            Error::Config(_) => {}
            _ => panic!("Expected Config error"),
        }
    }
}
