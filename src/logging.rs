//! One-shot logger bring-up, mirroring how the rest of the retrieved pack
//! wires `env_logger` behind a default-on feature instead of forcing the
//! embedder to configure one.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs the built-in `env_logger`, if the `builtin_env_logger` feature
/// is enabled. Safe to call more than once; only the first call does
/// anything. Embedders that want their own logging framework can disable
/// the feature and call `log::set_logger` themselves before starting the
/// collector.
pub(crate) fn try_init() {
    INIT.call_once(|| {
        #[cfg(feature = "builtin_env_logger")]
        {
            let result = env_logger::try_init_from_env(
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "warn"),
            );
            match result {
                Ok(()) => log::debug!("reclaim: initialized the built-in env_logger"),
                Err(e) => log::debug!("reclaim: failed to initialize the built-in env_logger: {e}"),
            }
        }
        #[cfg(not(feature = "builtin_env_logger"))]
        {
            log::debug!("reclaim: builtin_env_logger feature disabled, not installing a logger");
        }
    });
}
