use crate::config::Env;
use tracing_subscriber::EnvFilter;

/// Build the process-wide tracing subscriber for the given environment.
///
/// `local` gets human-readable formatting at debug level, `dev` gets JSON at
/// debug level, `prod` gets JSON at info level.
pub fn init_tracing(env: Env) {
    let default_level = match env {
        Env::Local | Env::Dev => "debug",
        Env::Prod => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    match env {
        Env::Local => {
            builder.init();
        }
        Env::Dev | Env::Prod => {
            builder.json().init();
        }
    }
}
