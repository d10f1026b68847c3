use std::sync::Arc;

use crate::config::ArchiveCfg;
use crate::readiness::Readiness;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<ArchiveCfg>,
    pub ready: Arc<Readiness>,
}
