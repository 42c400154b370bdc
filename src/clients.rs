use std::sync::Arc;

use crate::pubsub::Publisher;
use crate::storage::PtoRepository;

/// Long lived collaborators used by the lambda function. Built once at
/// process start and shared, read-only, by every invocation.
#[derive(Clone)]
pub struct Clients {
    pub repository: Arc<dyn PtoRepository>,
    pub publisher: Arc<dyn Publisher>,
}

impl Clients {
    pub fn new(repository: Arc<dyn PtoRepository>, publisher: Arc<dyn Publisher>) -> Self {
        Clients {
            repository,
            publisher,
        }
    }
}
