use serde::de::{Deserialize, Deserializer, Error as SerdeError};
use serde::ser::{Serialize, Serializer};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::ops::Deref;
use std::str::FromStr;
use url;

use datatype::Error;


/// Encapsulate a url with additional methods and traits used throughout the
/// director/repo endpoints and the config file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Url(pub url::Url);

impl Url {
    /// Append the string suffix to this URL.
    pub fn join(&self, suffix: &str) -> Url {
        let mut url = self.0.clone();
        url.path_segments_mut()
            .expect("couldn't get url segments")
            .pop_if_empty() // drop trailing slash before extending
            .extend(suffix.split('/'));
        Url(url)
    }
}

impl FromStr for Url {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Url(url::Url::parse(s)?))
    }
}

impl<'de> Deserialize<'de> for Url {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Url, D::Error> {
        let s = String::deserialize(de)?;
        s.parse().map_err(|err: Error| SerdeError::custom(err.to_string()))
    }
}

impl Serialize for Url {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&self.0.to_string())
    }
}

impl Deref for Url {
    type Target = url::Url;

    fn deref(&self) -> &url::Url {
        &self.0
    }
}

impl Display for Url {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let host = self.0.host_str().unwrap_or("localhost");
        if let Some(port) = self.0.port() {
            write!(f, "{}://{}:{}{}", self.0.scheme(), host, port, self.0.path())
        } else {
            write!(f, "{}://{}{}", self.0.scheme(), host, self.0.path())
        }
    }
}

/// Enumerate the supported HTTP methods the transport collaborator accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let method = match *self {
            Method::Get  => "GET",
            Method::Post => "POST",
            Method::Put  => "PUT",
        };
        write!(f, "{}", method)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        let slash:    Url = "http://localhost:1234/foo/".parse().unwrap();
        let no_slash: Url = "http://localhost:1234/foo".parse().unwrap();
        let expect:   Url = "http://localhost:1234/foo/bar".parse().unwrap();
        assert_eq!(slash.join("bar"), expect);
        assert_eq!(no_slash.join("bar"), expect);
        assert_eq!(slash.join("a/b"), "http://localhost:1234/foo/a/b".parse().unwrap());
    }
}
