//! Request/metadata translation with reserved-key enforcement.

use weft_api::{Headers, Request, Status};

use crate::Metadata;

/// Reserved metadata keys. Case-insensitive, canonical lowercase.
///
/// These carry the canonical request's reserved fields on the wire and are
/// disjoint from the application header keyspace by construction:
/// [`request_to_metadata`] rejects any application header matching one.
pub mod reserved {
    pub const CALLER: &str = "rpc-caller";
    pub const SERVICE: &str = "rpc-service";
    pub const SHARD_KEY: &str = "rpc-shard-key";
    pub const ROUTING_KEY: &str = "rpc-routing-key";
    pub const ROUTING_DELEGATE: &str = "rpc-routing-delegate";
    pub const ENCODING: &str = "rpc-encoding";
    pub const ERROR_NAME: &str = "rpc-error-name";

    /// All reserved keys.
    pub const ALL: [&str; 7] = [
        CALLER,
        SERVICE,
        SHARD_KEY,
        ROUTING_KEY,
        ROUTING_DELEGATE,
        ENCODING,
        ERROR_NAME,
    ];

    /// Whether `key` (any case) is reserved.
    pub fn is_reserved(key: &str) -> bool {
        ALL.iter().any(|r| key.eq_ignore_ascii_case(r))
    }
}

/// Metadata key carrying the trace id. Not part of the reserved set: it is
/// framework plumbing, not a request field, and is filtered from response
/// headers separately.
pub const TRACE_ID: &str = "rpc-trace-id";

fn push_if_set(metadata: &mut Metadata, key: &str, value: &str) {
    if !value.is_empty() {
        metadata.push((key.to_owned(), value.to_owned()));
    }
}

/// Translate a request's reserved fields and application headers to wire
/// metadata.
///
/// Empty reserved fields are omitted. Fails if an application header key
/// case-insensitively matches a reserved key.
pub fn request_to_metadata(req: &Request) -> Result<Metadata, Status> {
    let mut metadata = Metadata::new();
    push_if_set(&mut metadata, reserved::CALLER, &req.caller);
    push_if_set(&mut metadata, reserved::SERVICE, &req.service);
    push_if_set(&mut metadata, reserved::SHARD_KEY, &req.shard_key);
    push_if_set(&mut metadata, reserved::ROUTING_KEY, &req.routing_key);
    push_if_set(
        &mut metadata,
        reserved::ROUTING_DELEGATE,
        &req.routing_delegate,
    );
    push_if_set(&mut metadata, reserved::ENCODING, &req.encoding);
    for (key, value) in req.headers.iter() {
        if reserved::is_reserved(key) {
            return Err(Status::invalid_argument(format!(
                "cannot use reserved header {key:?} in application headers"
            )));
        }
        metadata.push((key.to_owned(), value.to_owned()));
    }
    Ok(metadata)
}

/// Translate wire metadata back to a request.
///
/// The exact inverse of [`request_to_metadata`] modulo lowercase
/// canonicalization of header keys: reserved keys populate the reserved
/// fields (missing keys decode to empty), everything else becomes an
/// application header. A key occurring more than once (after case folding)
/// is an error; every key the model carries is single-valued.
///
/// The procedure and body do not travel in metadata; the transport fills
/// them in from the wire path and payload.
pub fn metadata_to_request(metadata: &Metadata) -> Result<Request, Status> {
    let mut req = Request::default();
    let mut seen: Vec<String> = Vec::with_capacity(metadata.len());
    for (key, value) in metadata {
        let key = key.to_ascii_lowercase();
        if seen.contains(&key) {
            return Err(Status::invalid_argument(format!(
                "header {key:?} has more than one value"
            )));
        }
        match key.as_str() {
            reserved::CALLER => req.caller = value.clone(),
            reserved::SERVICE => req.service = value.clone(),
            reserved::SHARD_KEY => req.shard_key = value.clone(),
            reserved::ROUTING_KEY => req.routing_key = value.clone(),
            reserved::ROUTING_DELEGATE => req.routing_delegate = value.clone(),
            reserved::ENCODING => req.encoding = value.clone(),
            reserved::ERROR_NAME => {
                return Err(Status::invalid_argument(format!(
                    "header {key:?} is not valid in a request"
                )));
            }
            TRACE_ID => {
                seen.push(key);
                continue;
            }
            _ => {
                req.headers.insert(&key, value.clone());
            }
        }
        seen.push(key);
    }
    Ok(req)
}

/// Extract the trace id from wire metadata, if present.
pub fn trace_id_from_metadata(metadata: &Metadata) -> Option<String> {
    metadata
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(TRACE_ID))
        .map(|(_, v)| v.clone())
}

/// Translate response trailers to application headers, filtering out
/// reserved keys (the error-name side channel in particular).
pub fn trailers_to_headers(trailers: &Metadata) -> Headers {
    let mut headers = Headers::new();
    for (key, value) in trailers {
        if !reserved::is_reserved(key) && !key.eq_ignore_ascii_case(TRACE_ID) {
            headers.insert(key, value.clone());
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> Request {
        Request::new("caller", "service", "proc")
            .with_encoding("json")
            .with_shard_key("shard-1")
            .with_routing_key("rk")
            .with_routing_delegate("rd")
            .with_header("User-Key", "v1")
            .with_header("other", "v2")
    }

    #[test]
    fn round_trips_modulo_case_folding() {
        let req = sample_request();
        let metadata = request_to_metadata(&req).unwrap();
        let mut decoded = metadata_to_request(&metadata).unwrap();
        decoded.procedure = req.procedure.clone();
        assert_eq!(decoded, req);
    }

    #[test]
    fn empty_reserved_fields_are_omitted() {
        let req = Request::new("caller", "service", "proc");
        let metadata = request_to_metadata(&req).unwrap();
        assert_eq!(metadata.len(), 2);
        assert!(metadata.iter().all(|(_, v)| !v.is_empty()));

        // Missing keys decode to the zero value, not an error.
        let decoded = metadata_to_request(&metadata).unwrap();
        assert_eq!(decoded.shard_key, "");
        assert_eq!(decoded.encoding, "");
    }

    #[test]
    fn reserved_collision_is_rejected() {
        for key in reserved::ALL {
            let req = Request::new("c", "s", "p").with_header(key, "x");
            let err = request_to_metadata(&req).unwrap_err();
            assert!(
                err.message().contains("reserved header"),
                "unexpected message: {}",
                err.message()
            );
        }
        // Case-insensitively.
        let req = Request::new("c", "s", "p").with_header("RPC-Caller", "x");
        assert!(request_to_metadata(&req).is_err());

        // Non-reserved keys pass.
        let req = Request::new("c", "s", "p").with_header("rpc-custom", "x");
        assert!(request_to_metadata(&req).is_ok());
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let metadata = vec![
            ("rpc-caller".to_owned(), "a".to_owned()),
            ("RPC-CALLER".to_owned(), "b".to_owned()),
        ];
        let err = metadata_to_request(&metadata).unwrap_err();
        assert!(err.message().contains("has more than one value"));

        let metadata = vec![
            ("app-key".to_owned(), "a".to_owned()),
            ("app-key".to_owned(), "b".to_owned()),
        ];
        assert!(metadata_to_request(&metadata).is_err());
    }

    #[test]
    fn trailers_filter_reserved_keys() {
        let trailers = vec![
            ("rpc-error-name".to_owned(), "Xception".to_owned()),
            ("rpc-trace-id".to_owned(), "abc".to_owned()),
            ("App-Header".to_owned(), "yes".to_owned()),
        ];
        let headers = trailers_to_headers(&trailers);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("app-header"), Some("yes"));
    }
}
