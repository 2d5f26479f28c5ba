use inference::InferenceService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InferenceService>,
    pub jpeg_quality: u8,
}

impl AppState {
    pub fn new(service: InferenceService, jpeg_quality: u8) -> Self {
        Self {
            service: Arc::new(service),
            jpeg_quality,
        }
    }
}
