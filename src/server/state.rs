use std::sync::Arc;

use crate::auth::{IdentityResolver, JwtIdentityResolver};
use crate::config::Settings;
use crate::events::EventPublisher;
use crate::gateway::Gateway;
use crate::intents::IntentForwarder;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub gateway: Arc<Gateway>,
    pub identity_resolver: Arc<dyn IdentityResolver>,
    pub publisher: EventPublisher,
}

impl AppState {
    /// Wire the gateway with the JWT identity resolver
    pub fn new(settings: Settings, forwarder: Arc<dyn IntentForwarder>) -> Self {
        let resolver = Arc::new(JwtIdentityResolver::new(&settings.jwt));
        Self::with_resolver(settings, forwarder, resolver)
    }

    pub fn with_resolver(
        settings: Settings,
        forwarder: Arc<dyn IntentForwarder>,
        identity_resolver: Arc<dyn IdentityResolver>,
    ) -> Self {
        let gateway = Arc::new(Gateway::new(settings.gateway.clone(), forwarder));
        let publisher = EventPublisher::new(gateway.hub().clone());

        Self {
            settings: Arc::new(settings),
            gateway,
            identity_resolver,
            publisher,
        }
    }
}
