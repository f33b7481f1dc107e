use serde_json::Value;
use tracing::{info, warn};

use crate::config::RepositoryConfig;
use crate::error::Result;
use crate::manager::{Strategies, VersionManager};
use crate::protocol::{PullRequest, PushRequest, Request, Response, Status};

/// One repository: a schema, a version graph and the manager serializing writes to it.
pub struct Repository {
    manager: VersionManager,
}

impl Repository {
    pub fn new(config: RepositoryConfig, strategies: Strategies) -> Result<Self> {
        let schema = config.schema()?;
        info!(
            app = %config.app_name,
            types = schema.type_names().count(),
            strategies = strategies.len(),
            "opened repository"
        );
        Ok(Self {
            manager: VersionManager::new(config.app_name, schema, strategies),
        })
    }

    pub fn manager(&self) -> &VersionManager {
        &self.manager
    }

    pub fn app_name(&self) -> &str {
        self.manager.app_name()
    }

    /// Serves one parsed request.
    pub async fn handle(&self, request: Request) -> Result<Response> {
        match request {
            Request::Push(push) => self.push(push),
            Request::Pull(pull) => self.pull(pull).await,
        }
    }

    /// Serves a raw field-tagged body. Failures become a `GeneralException` response.
    pub async fn handle_value(&self, body: Value) -> Value {
        let response = match Request::from_value(body) {
            Ok(request) => self.handle(request).await,
            Err(e) => Err(e),
        };
        let response = response.unwrap_or_else(|e| {
            warn!(error = %e, "request failed");
            Response {
                status: Status::GeneralException,
                ..Response::success(self.app_name())
            }
        });
        response.to_value().unwrap_or_else(|e| {
            warn!(error = %e, "cannot encode response");
            Value::Null
        })
    }

    fn push(&self, push: PushRequest) -> Result<Response> {
        self.manager
            .receive_data(&push.app_name, &push.start, &push.end, push.delta, true)?;
        Ok(Response::success(self.app_name()))
    }

    async fn pull(&self, pull: PullRequest) -> Result<Response> {
        if pull.wait {
            if pull.timeout.is_zero() {
                self.manager.wait_graph_change(&pull.start).await;
            } else if !self
                .manager
                .wait_graph_change_for(&pull.start, pull.timeout)
                .await
            {
                return Ok(Response::timeout(self.app_name()));
            }
        }
        let read = self
            .manager
            .retrieve_data(&pull.app_name, &pull.start, Some(&pull.types))?;
        Ok(Response::success(self.app_name()).with_data(read.start, read.end, read.delta))
    }

    /// The reader `app` confirmed it received `start -> end`.
    pub fn acknowledge(&self, app: &str, start: &str, end: &str) -> Result<()> {
        self.manager.data_sent_confirmed(app, start, end)
    }

    /// Tears the graph down and releases every waiting pull.
    pub fn shutdown(&self) {
        info!(app = %self.app_name(), "shutting down repository");
        self.manager.teardown();
    }
}
