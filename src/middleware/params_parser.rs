//! Request body decoding.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::logger::TaggedLogger;
use crate::error::{BoxError, Error, ParseError};
use crate::request::{Request, keys};
use crate::response::Response;
use crate::stack::Interceptor;

/// Decoded body parameters, stored under [`keys::REQUEST_PARAMETERS`].
pub type Params = Map<String, Value>;

/// Decodes a raw body into parameters.
pub type ParserFn = Arc<dyn Fn(&[u8]) -> Result<Params, BoxError> + Send + Sync>;

/// JSON bodies. A document that is not an object lands under `"_json"`.
pub fn parse_json(raw: &[u8]) -> Result<Params, BoxError> {
    match serde_json::from_slice(raw)? {
        Value::Object(params) => Ok(params),
        other => Ok(Params::from_iter([("_json".to_owned(), other)])),
    }
}

/// Decodes request bodies according to their content type.
///
/// Bodies with no registered parser, and empty bodies, leave the existing
/// parameters in place (or an empty map). A parser failure is logged at
/// debug level with the raw body and fails the exchange with
/// [`ParseError`].
pub struct ParamsParser {
    parsers: HashMap<String, ParserFn>,
}

impl Default for ParamsParser {
    fn default() -> Self {
        let json: ParserFn = Arc::new(parse_json);
        Self { parsers: HashMap::from([("application/json".to_owned(), json)]) }
    }
}

impl ParamsParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `parser` for `mime`, replacing any previous one.
    pub fn parser<F>(mut self, mime: &str, parser: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Params, BoxError> + Send + Sync + 'static,
    {
        self.parsers.insert(mime.to_ascii_lowercase(), Arc::new(parser));
        self
    }

    fn parse(&self, req: &Request) -> Result<Option<Params>, ParseError> {
        if req.content_length() == 0 || req.body().is_empty() {
            return Ok(None);
        }
        let Some(parser) = req.content_mime_type().and_then(|mime| self.parsers.get(&mime)) else {
            return Ok(None);
        };

        parser(&req.body()[..]).map(Some).map_err(|e| {
            TaggedLogger::for_request(req).debug_lazy(|| {
                format!(
                    "Error occurred while parsing request parameters.\nContents:\n\n{}",
                    String::from_utf8_lossy(req.body()),
                )
            });
            ParseError::new(e)
        })
    }
}

impl Interceptor for ParamsParser {
    fn on_start(&self, req: &mut Request, _res: &mut Response) -> Result<(), Error> {
        let params = match self.parse(req)? {
            Some(params) => params,
            None => request_parameters(req).cloned().unwrap_or_default(),
        };
        req.env_mut().insert(keys::REQUEST_PARAMETERS, params);
        Ok(())
    }
}

/// Parameters decoded by [`ParamsParser`] for this exchange.
pub fn request_parameters(req: &Request) -> Option<&Params> {
    req.env().get::<Params>(keys::REQUEST_PARAMETERS)
}
