use crate::auth::Principal;
use crate::http::{Request, Response};
use crate::security::redact_uri;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::time::Instant;

/// Per-request state threaded through every stage
///
/// The request is mutable during the inbound pass, the response during
/// the outbound pass. Stages talk to their own outbound half through
/// the typed `data` slots.
pub struct Context {
    pub req: Request,
    pub res: Option<Response>,
    /// Storage for stage data
    data: HashMap<String, Box<dyn Any + Send + Sync>>,
    received_at: Instant,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self {
            req: request,
            res: None,
            data: HashMap::new(),
            received_at: Instant::now(),
        }
    }

    /// When the pipeline took the request
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    // Response management methods

    /// Set the response for this context
    pub fn set_response(&mut self, response: Response) {
        self.res = Some(response);
    }

    /// Get the response if set
    pub fn get_response(&self) -> Option<&Response> {
        self.res.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut Response> {
        self.res.as_mut()
    }

    /// Take the response, leaving None in its place
    pub fn take_response(&mut self) -> Option<Response> {
        self.res.take()
    }

    // Stage data storage methods

    /// Store data for communication between the two phases of a stage
    pub fn set<T: Any + Send + Sync + 'static>(&mut self, key: &str, value: T) {
        self.data.insert(key.to_string(), Box::new(value));
    }

    /// Retrieve data stored by a stage
    pub fn get<T: Any + Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.data
            .get(key)
            .and_then(|boxed| boxed.downcast_ref::<T>())
    }

    pub fn has_data(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.req.principal.as_ref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.req.user_agent()
    }

    pub fn url(&self) -> &str {
        &self.req.uri
    }

    /// Requester details attached to every security log entry
    ///
    /// The URL is logged with sensitive query values already redacted.
    pub fn requester(&self) -> Map<String, Value> {
        let mut context = Map::new();
        context.insert("ip".to_string(), json!(self.req.client_ip));
        context.insert("method".to_string(), json!(self.req.method));
        context.insert("url".to_string(), json!(redact_uri(&self.req.uri)));
        context.insert(
            "user_agent".to_string(),
            json!(self.user_agent().unwrap_or("")),
        );
        context
    }
}
