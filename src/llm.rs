//! Model call contract plus the ordered retry/fallback router.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ModelError, ModelErrorKind};
use crate::logging;

/// A text-in/text-out language model endpoint.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, ModelError>;
}

/// One step of the fallback chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRoute {
    pub model: String,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl ModelRoute {
    pub fn new(model: &str, timeout: Duration, max_attempts: u32) -> Self {
        Self {
            model: model.to_string(),
            timeout,
            max_attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ModelOutcome {
    Reply { text: String, model: String },
    Failed { reason: String, last_error: Option<ModelError> },
}

impl ModelOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            ModelOutcome::Reply { text, .. } => Some(text),
            ModelOutcome::Failed { .. } => None,
        }
    }
}

/// Walks the routes in order: each route is retried up to its attempt
/// budget with a fixed delay before moving to the next one.
pub struct ModelRouter {
    client: Arc<dyn ModelClient>,
    routes: Vec<ModelRoute>,
    retry_delay: Duration,
}

impl ModelRouter {
    pub fn new(client: Arc<dyn ModelClient>, routes: Vec<ModelRoute>, retry_delay: Duration) -> Self {
        Self {
            client,
            routes,
            retry_delay,
        }
    }

    pub fn routes(&self) -> &[ModelRoute] {
        &self.routes
    }

    pub async fn complete(&self, prompt: &str, session: Option<&str>) -> ModelOutcome {
        let mut last_error: Option<ModelError> = None;

        for route in &self.routes {
            let attempts = route.max_attempts.max(1);
            for attempt in 1..=attempts {
                let result =
                    match tokio::time::timeout(route.timeout, self.client.complete(&route.model, prompt)).await {
                        Ok(Ok(text)) if !text.trim().is_empty() => Ok(text),
                        Ok(Ok(_)) => Err(ModelError::malformed("empty reply")),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(ModelError::new(
                            ModelErrorKind::Timeout,
                            format!("no answer within {}s", route.timeout.as_secs_f32()),
                        )),
                    };

                match result {
                    Ok(text) => {
                        if attempt > 1 || route.model != self.routes[0].model {
                            logging::log_model(session, &format!(
                                "{} answered on attempt {}", route.model, attempt
                            ));
                        }
                        return ModelOutcome::Reply {
                            text,
                            model: route.model.clone(),
                        };
                    }
                    Err(e) => {
                        logging::log_model(session, &format!(
                            "{} attempt {}/{} failed: {}", route.model, attempt, attempts, e
                        ));
                        // Same key, same answer: skip the remaining retries
                        let give_up = e.kind == ModelErrorKind::Auth;
                        last_error = Some(e);
                        if give_up {
                            break;
                        }
                        if attempt < attempts && !self.retry_delay.is_zero() {
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    }
                }
            }
        }

        let reason = last_error
            .as_ref()
            .map(|e| e.user_reason().to_string())
            .unwrap_or_else(|| "no model is configured".to_string());
        logging::log_error(session, &format!("All model routes failed: {}", reason));
        ModelOutcome::Failed { reason, last_error }
    }
}
