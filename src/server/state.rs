use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::sender::Mailer;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub mailer: Arc<Mailer>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, mailer: Arc<Mailer>) -> Self {
        Self {
            settings,
            mailer,
            started_at: Instant::now(),
        }
    }
}
