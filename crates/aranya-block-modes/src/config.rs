//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::{
    block::MAX_BLOCK_SIZE,
    error::{Error, Result},
};

/// Tunables shared by every context.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The most bytes submitted to the block primitive in a
    /// single job.
    ///
    /// Larger requests are split into several jobs. The value is
    /// rounded down to a multiple of the block size.
    pub max_transfer_len: usize,
}

impl Config {
    /// The default value of [`max_transfer_len`][Self::max_transfer_len].
    pub const DEFAULT_MAX_TRANSFER_LEN: usize = 64 * 1024;

    /// Checks that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_transfer_len < MAX_BLOCK_SIZE {
            return Err(Error::MechanismParamInvalid(
                "max_transfer_len must hold at least one block",
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_transfer_len: Self::DEFAULT_MAX_TRANSFER_LEN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.validate(), Ok(()));

        let cfg: Config = serde_json::from_str(r#"{"max_transfer_len": 4096}"#).unwrap();
        assert_eq!(cfg.max_transfer_len, 4096);
    }

    #[test]
    fn test_validate() {
        let cfg = Config {
            max_transfer_len: 8,
        };
        assert!(matches!(
            cfg.validate(),
            Err(Error::MechanismParamInvalid(_))
        ));
    }
}
