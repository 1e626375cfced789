use crate::cache::PollCache;
use crate::config::Config;
use crate::db::Database;

pub struct AppState {
    pub db: Database,
    pub cache: PollCache,
    pub config: Config,
}
