use std::fs;
use std::path::Path;

use crate::error::{Result, ResultExt};

/// Piece selection strategy for swarm downloads.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorChoice {
    Rarest,
    Inorder,
    Random,
    Geom,
    Sparse,
}

/// Tuning knobs for the storage layer. Loaded from TOML where a file
/// is given, otherwise the defaults below apply.
#[derive(Clone, Debug)]
pub struct Config {
    pub selector: SelectorChoice,
    /// Selector for segmented HTTP/FTP downloads, which pick over the
    /// master bitmap instead of peer bitmaps.
    pub stream_selector: SelectorChoice,
    /// Skew of the geom selector toward low indices.
    pub geom_ratio: f64,
    /// Remaining-piece count under which end game begins.
    pub end_game_pieces: usize,
    /// Write cache ceiling in bytes; 0 disables caching.
    pub write_cache_limit: usize,
    /// Read size for one cooperative validation step.
    pub validate_read_len: usize,
    /// Accept a control file whose piece length changed, converting
    /// the old bitmap to the new granularity.
    pub allow_piece_length_change: bool,
}

#[derive(Deserialize, Serialize)]
pub struct ConfigFile {
    pub selector: Option<SelectorChoice>,
    pub stream_selector: Option<SelectorChoice>,
    pub geom_ratio: Option<f64>,
    pub end_game_pieces: Option<usize>,
    pub write_cache_limit: Option<usize>,
    pub validate_read_len: Option<usize>,
    pub allow_piece_length_change: Option<bool>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let data = fs::read_to_string(path.as_ref())?;
        let file: ConfigFile =
            toml::from_str(&data).chain_err(|| "invalid configuration file")?;
        Ok(Config::from_file(file))
    }

    pub fn from_file(file: ConfigFile) -> Config {
        let mut base: Config = Default::default();
        if let Some(s) = file.selector {
            base.selector = s;
        }
        if let Some(s) = file.stream_selector {
            base.stream_selector = s;
        }
        if let Some(r) = file.geom_ratio {
            if r > 1.0 {
                base.geom_ratio = r;
            }
        }
        if let Some(n) = file.end_game_pieces {
            base.end_game_pieces = n;
        }
        if let Some(n) = file.write_cache_limit {
            base.write_cache_limit = n;
        }
        if let Some(n) = file.validate_read_len {
            if n > 0 {
                base.validate_read_len = n;
            }
        }
        if let Some(b) = file.allow_piece_length_change {
            base.allow_piece_length_change = b;
        }
        base
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            selector: SelectorChoice::Rarest,
            stream_selector: SelectorChoice::Sparse,
            geom_ratio: 1.5,
            end_game_pieces: 20,
            write_cache_limit: 16 * 1024 * 1024,
            validate_read_len: 16_384,
            allow_piece_length_change: false,
        }
    }
}
