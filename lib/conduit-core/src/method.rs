//! HTTP method types.

use std::str::FromStr;

use derive_more::Display;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Method {
    /// GET method.
    #[display("GET")]
    Get,
    /// POST method.
    #[display("POST")]
    Post,
    /// PUT method.
    #[display("PUT")]
    Put,
    /// DELETE method.
    #[display("DELETE")]
    Delete,
    /// PATCH method.
    #[display("PATCH")]
    Patch,
    /// HEAD method.
    #[display("HEAD")]
    Head,
    /// OPTIONS method.
    #[display("OPTIONS")]
    Options,
}

impl Method {
    /// Returns `true` if the method is idempotent (RFC 9110 §9.2.2).
    ///
    /// Retry conditions use this to avoid replaying non-idempotent requests.
    #[must_use]
    pub const fn is_idempotent(&self) -> bool {
        !matches!(self, Self::Post | Self::Patch)
    }

    fn to_http(self) -> http::Method {
        match self {
            Self::Get => http::Method::GET,
            Self::Post => http::Method::POST,
            Self::Put => http::Method::PUT,
            Self::Delete => http::Method::DELETE,
            Self::Patch => http::Method::PATCH,
            Self::Head => http::Method::HEAD,
            Self::Options => http::Method::OPTIONS,
        }
    }
}

impl From<Method> for http::Method {
    fn from(method: Method) -> Self {
        method.to_http()
    }
}

impl FromStr for Method {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = match s.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "PATCH" => Self::Patch,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            _ => {
                return Err(crate::Error::invalid_request(format!(
                    "unsupported HTTP method: {s}"
                )));
            }
        };
        Ok(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency() {
        let idempotent = [Method::Get, Method::Head, Method::Options, Method::Put, Method::Delete];
        assert!(idempotent.iter().all(Method::is_idempotent));
        assert!(!Method::Post.is_idempotent());
        assert!(!Method::Patch.is_idempotent());
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("get".parse::<Method>().expect("get"), Method::Get);
        assert_eq!("Patch".parse::<Method>().expect("patch"), Method::Patch);
        assert!("TRACE".parse::<Method>().is_err());
    }

    #[test]
    fn converts_to_http_method() {
        assert_eq!(http::Method::from(Method::Delete), http::Method::DELETE);
        assert_eq!(Method::Options.to_string(), "OPTIONS");
    }
}
