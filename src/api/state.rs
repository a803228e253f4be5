use std::sync::Arc;

use crate::{auth::AuthService, config::Settings, service::ServiceContext};

#[derive(Clone)]
pub struct AppState {
    pub service_context: Arc<ServiceContext>,
    pub auth_service: Arc<AuthService>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(service_context: Arc<ServiceContext>, settings: Arc<Settings>) -> Self {
        let auth_service = Arc::new(AuthService::new(
            &settings.auth.jwt_secret,
            settings.auth.owner_email.clone(),
        ));

        Self {
            service_context,
            auth_service,
            settings,
        }
    }
}
