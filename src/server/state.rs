use std::sync::Arc;

use crate::background::Background;

#[derive(Clone)]
pub(crate) struct ServerState {
    pub(crate) background: Arc<Background>,
}
