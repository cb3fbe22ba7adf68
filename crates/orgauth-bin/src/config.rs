use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

pub(crate) static CONFIG_BIN: LazyLock<BinConfig> = LazyLock::new(get_config);

#[derive(Clone, Deserialize, Serialize, Debug, Default)]
pub(crate) struct BinConfig {
    #[serde(default)]
    pub(crate) debug: DebugConfig,
}

#[derive(Clone, Deserialize, Serialize, Debug, Default)]
pub(crate) struct DebugConfig {
    /// Include file and line number in log lines.
    #[serde(default)]
    pub(crate) extended_logs: bool,
    /// Pretty print JSON written to stdout.
    #[serde(default)]
    pub(crate) pretty_output: bool,
}

fn get_config() -> BinConfig {
    let defaults = figment::providers::Serialized::defaults(BinConfig::default());

    #[cfg(not(test))]
    let prefixes = &["ORGAUTH__"];
    #[cfg(test)]
    let prefixes = &["ORGAUTH_TEST__"];

    let mut config = figment::Figment::from(defaults);
    for prefix in prefixes {
        let env = figment::providers::Env::prefixed(prefix).split("__");
        config = config.merge(env);
    }

    match config.extract::<BinConfig>() {
        Ok(c) => c,
        Err(e) => {
            panic!("Failed to extract orgauth binary config: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_logs_env_vars() {
        figment::Jail::expect_with(|_jail| {
            let config = get_config();
            assert!(!config.debug.extended_logs);
            Ok(())
        });

        figment::Jail::expect_with(|jail| {
            jail.set_env("ORGAUTH_TEST__DEBUG__EXTENDED_LOGS", "true");
            let config = get_config();
            assert!(config.debug.extended_logs);
            Ok(())
        });
    }

    #[test]
    fn test_pipeline_settings_do_not_disturb_bin_config() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ORGAUTH_TEST__JWT__HEADER_NAME", "X-JWT-Assertion");
            jail.set_env("ORGAUTH_TEST__DEBUG__PRETTY_OUTPUT", "true");
            let config = get_config();
            assert!(config.debug.pretty_output);
            assert!(!config.debug.extended_logs);
            Ok(())
        });
    }
}
