//! Procedure routing: resolving a request to a handler.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::{CallContext, OnewayHandler, Request, Status, StreamHandler, UnaryHandler};

/// The kind of call a handler serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Unary,
    Oneway,
    Stream,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandlerKind::Unary => "unary",
            HandlerKind::Oneway => "oneway",
            HandlerKind::Stream => "stream",
        })
    }
}

/// Tagged union over the three handler kinds.
#[derive(Clone)]
pub enum HandlerSpec {
    Unary(Arc<dyn UnaryHandler>),
    Oneway(Arc<dyn OnewayHandler>),
    Stream(Arc<dyn StreamHandler>),
}

impl HandlerSpec {
    pub fn kind(&self) -> HandlerKind {
        match self {
            HandlerSpec::Unary(_) => HandlerKind::Unary,
            HandlerSpec::Oneway(_) => HandlerKind::Oneway,
            HandlerSpec::Stream(_) => HandlerKind::Stream,
        }
    }
}

impl fmt::Debug for HandlerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerSpec({})", self.kind())
    }
}

/// A registered procedure.
#[derive(Debug, Clone)]
pub struct Procedure {
    /// Logical procedure name, unique within the service.
    pub name: String,
    /// Service the procedure belongs to.
    pub service: String,
    /// Expected payload encoding tag; informational.
    pub encoding: String,
    pub spec: HandlerSpec,
}

/// Resolves procedures to handlers.
///
/// Implemented by the framework's [`MapRouter`] and by generated or custom
/// routing layers built on top of it.
pub trait Router: Send + Sync {
    /// All registered procedures, used by inbounds to describe themselves.
    fn procedures(&self) -> Vec<Procedure>;

    /// Resolve a handler for the request, or fail with an
    /// invalid-argument-class error for unknown procedures.
    fn route(&self, ctx: &CallContext, req: &Request) -> Result<HandlerSpec, Status>;
}

/// A table-backed [`Router`] keyed by `(service, procedure)`.
///
/// Procedures registered without an explicit service fall under the
/// router's default service name. Lookups try the request's service first
/// and fall back to the default service.
pub struct MapRouter {
    default_service: String,
    table: HashMap<(String, String), Procedure>,
}

impl MapRouter {
    pub fn new(default_service: impl Into<String>) -> Self {
        Self {
            default_service: default_service.into(),
            table: HashMap::new(),
        }
    }

    /// Register a procedure. An empty `service` means the default service.
    pub fn register(&mut self, mut procedure: Procedure) {
        if procedure.service.is_empty() {
            procedure.service = self.default_service.clone();
        }
        let key = (procedure.service.clone(), procedure.name.clone());
        self.table.insert(key, procedure);
    }

    /// Builder-style registration of a unary handler under the default
    /// service.
    pub fn with_unary(mut self, name: impl Into<String>, handler: Arc<dyn UnaryHandler>) -> Self {
        self.register(Procedure {
            name: name.into(),
            service: String::new(),
            encoding: String::new(),
            spec: HandlerSpec::Unary(handler),
        });
        self
    }

    /// Builder-style registration of a oneway handler under the default
    /// service.
    pub fn with_oneway(mut self, name: impl Into<String>, handler: Arc<dyn OnewayHandler>) -> Self {
        self.register(Procedure {
            name: name.into(),
            service: String::new(),
            encoding: String::new(),
            spec: HandlerSpec::Oneway(handler),
        });
        self
    }

    /// Builder-style registration of a stream handler under the default
    /// service.
    pub fn with_stream(mut self, name: impl Into<String>, handler: Arc<dyn StreamHandler>) -> Self {
        self.register(Procedure {
            name: name.into(),
            service: String::new(),
            encoding: String::new(),
            spec: HandlerSpec::Stream(handler),
        });
        self
    }
}

impl Router for MapRouter {
    fn procedures(&self) -> Vec<Procedure> {
        let mut procedures: Vec<_> = self.table.values().cloned().collect();
        procedures.sort_by(|a, b| (&a.service, &a.name).cmp(&(&b.service, &b.name)));
        procedures
    }

    fn route(&self, _ctx: &CallContext, req: &Request) -> Result<HandlerSpec, Status> {
        let by_service = self
            .table
            .get(&(req.service.clone(), req.procedure.clone()));
        let resolved = by_service.or_else(|| {
            self.table
                .get(&(self.default_service.clone(), req.procedure.clone()))
        });
        match resolved {
            Some(procedure) => Ok(procedure.spec.clone()),
            None => Err(Status::invalid_argument(format!(
                "unrecognized procedure {:?} for service {:?}",
                req.procedure, req.service
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Response, unary};

    fn ok_handler() -> Arc<dyn UnaryHandler> {
        unary(|_ctx, _req| async { Ok(Response::default()) })
    }

    #[test]
    fn routes_by_service_with_default_fallback() {
        let router = MapRouter::new("svc").with_unary("echo", ok_handler());
        let ctx = CallContext::new();

        let req = Request::new("c", "svc", "echo");
        assert!(router.route(&ctx, &req).is_ok());

        // Unknown service falls back to the default service's table.
        let req = Request::new("c", "other", "echo");
        assert!(router.route(&ctx, &req).is_ok());
    }

    #[test]
    fn unknown_procedure_is_invalid_argument() {
        let router = MapRouter::new("svc").with_unary("echo", ok_handler());
        let req = Request::new("c", "svc", "no-such-procedure");
        let err = router.route(&CallContext::new(), &req).unwrap_err();
        assert_eq!(err.code(), crate::Code::InvalidArgument);
        assert!(
            err.message()
                .contains("unrecognized procedure \"no-such-procedure\"")
        );
    }

    #[test]
    fn procedures_are_sorted() {
        let router = MapRouter::new("svc")
            .with_unary("b", ok_handler())
            .with_unary("a", ok_handler());
        let names: Vec<_> = router.procedures().into_iter().map(|p| p.name).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
