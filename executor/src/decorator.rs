use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, Result};
use crate::token::AttestationToken;
use crate::transport::OutboundRequest;
use reqwest::header::{HeaderName, HeaderValue};

/// Hook applied to every outbound request before it reaches a transport
pub trait RequestDecorator: Send + Sync {
    fn decorate(&self, request: &mut OutboundRequest, token: &AttestationToken) -> Result<()>;
}

/// Sets the attestation token header, falling back to the sentinel
#[derive(Debug, Clone)]
pub struct AttestationHeader {
    name: HeaderName,
    sentinel: String,
}

impl AttestationHeader {
    pub fn new(name: &str, sentinel: impl Into<String>) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ExecutorError::Config(format!("Invalid header name '{}': {}", name, e)))?;
        Ok(Self {
            name,
            sentinel: sentinel.into(),
        })
    }

    pub fn from_config(config: &ExecutorConfig) -> Result<Self> {
        Self::new(&config.token_header, config.sentinel_token.clone())
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.name
    }
}

impl RequestDecorator for AttestationHeader {
    fn decorate(&self, request: &mut OutboundRequest, token: &AttestationToken) -> Result<()> {
        let value = HeaderValue::from_str(token.header_value(&self.sentinel)).map_err(|e| {
            ExecutorError::InvalidRequest(format!("Token is not a valid header value: {}", e))
        })?;

        // insert, not append: a retry must never carry the first attempt's token
        request.headers.insert(self.name.clone(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use reqwest::Method;
    use url::Url;

    fn request() -> OutboundRequest {
        OutboundRequest::new(
            Method::GET,
            Url::parse("https://demo.example/shapes").unwrap(),
            HeaderMap::new(),
        )
    }

    #[test]
    fn test_issued_token_attached() {
        let decorator = AttestationHeader::from_config(&ExecutorConfig::default()).unwrap();
        let mut req = request();

        decorator
            .decorate(&mut req, &AttestationToken::Issued("tok".to_string()))
            .unwrap();

        assert_eq!(req.headers.get("Approov-Token").unwrap(), "tok");
    }

    #[test]
    fn test_unavailable_token_sends_sentinel() {
        let decorator = AttestationHeader::new("X-Attestation", "NONE").unwrap();
        let mut req = request();

        decorator
            .decorate(&mut req, &AttestationToken::Unavailable)
            .unwrap();

        assert_eq!(req.headers.get("x-attestation").unwrap(), "NONE");
    }

    #[test]
    fn test_redecorating_replaces_token() {
        let decorator = AttestationHeader::new("Approov-Token", "NOTOKEN").unwrap();
        let mut req = request();

        decorator
            .decorate(&mut req, &AttestationToken::Issued("first".to_string()))
            .unwrap();
        decorator
            .decorate(&mut req, &AttestationToken::Issued("second".to_string()))
            .unwrap();

        let values: Vec<_> = req.headers.get_all("approov-token").iter().collect();
        assert_eq!(values, vec!["second"]);
    }

    #[test]
    fn test_invalid_token_value_rejected() {
        let decorator = AttestationHeader::new("Approov-Token", "NOTOKEN").unwrap();
        let mut req = request();

        let result = decorator.decorate(&mut req, &AttestationToken::Issued("bad\ntoken".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        assert!(AttestationHeader::new("not a header", "NOTOKEN").is_err());
    }
}
