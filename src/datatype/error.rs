use base64::DecodeError as Base64Error;
use chrono::ParseError as ChronoParseError;
use hex::FromHexError;
use openssl::error::ErrorStack as OpensslErrors;
use pem::PemError;
use serde_json::Error as SerdeJsonError;
use std::convert::From;
use std::fmt::{self, Display, Formatter};
use std::io::Error as IoError;
use std::str::Utf8Error;
use std::string::FromUtf8Error;
use std::sync::PoisonError;
use toml::de::Error as TomlError;
use url::ParseError as UrlParseError;


/// System-wide errors returned from `Result` type failures. Each variant is a
/// machine-readable discriminant; `Display` renders the human-readable message.
///
/// Variants are grouped by the taxonomy the verification engine and update
/// state machine expose: `Verify*` (role/repository verification), `Fetch*`
/// (metadata and target retrieval), `Plan*` (target resolution) and
/// `Crypto*` (signature primitives), plus the general-purpose plumbing
/// errors bridged in from the libraries this crate depends on.
#[derive(Debug)]
pub enum Error {
    Base64(Base64Error),
    Client(String),
    Command(String),
    Config(String),
    DateTime(ChronoParseError),
    FromUtf8(FromUtf8Error),
    Hex(FromHexError),
    Io(IoError),
    Json(SerdeJsonError),
    KeyNotFound(String),
    KeySign(String),
    Openssl(OpensslErrors),
    PacMan(String),
    Parse(String),
    Pem(PemError),
    Poison(String),
    Toml(TomlError),
    UrlParse(UrlParseError),
    Utf8(Utf8Error),

    // -- Crypto primitives --
    CryptoBadKey(String),
    CryptoUnsupportedAlgorithm(String),

    // -- Role / repository verifier --
    VerifyExpired(String),
    VerifyThresholdNotMet(String),
    VerifyUnknownRole(String),
    VerifyVersionRollback(String),
    VerifyBadSignature(String),
    VerifyMalformedDocument(String),
    VerifyHashMismatch(String),
    VerifyLengthMismatch(String),
    VerifyDelegationCycle(String),

    // -- Target resolver --
    PlanUnknownEcu(String),
    PlanTargetMismatch(String),
    PlanHardwareIdMismatch(String),

    // -- Fetcher --
    FetchTransport(String),
    FetchNotFound(String),
    FetchSizeExceeded(String),
    FetchInterrupted,
    FetchTimeout(String),

    // -- Secondary interface / orchestrator --
    SecondaryRejected(String),
    Cancelled,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let inner: String = match *self {
            Error::Base64(ref err)      => format!("Base64 parse error: {}", err),
            Error::Client(ref err)      => format!("Http client error: {}", err),
            Error::Command(ref err)     => format!("Unknown command: {}", err),
            Error::Config(ref err)      => format!("Bad config: {}", err),
            Error::DateTime(ref err)    => format!("DateTime parse error: {}", err),
            Error::FromUtf8(ref err)    => format!("From utf8 error: {}", err),
            Error::Hex(ref err)         => format!("Not valid hex data: {}", err),
            Error::Io(ref err)          => format!("IO error: {}", err),
            Error::Json(ref err)        => format!("JSON parse error: {}", err),
            Error::KeyNotFound(ref err) => format!("Key not found: {}", err),
            Error::KeySign(ref err)     => format!("Key signing error: {}", err),
            Error::Openssl(ref err)     => format!("OpenSSL error: {}", err),
            Error::PacMan(ref err)      => format!("Package manager error: {}", err),
            Error::Parse(ref err)       => format!("Parse error: {}", err),
            Error::Pem(ref err)         => format!("PEM parse error: {}", err),
            Error::Poison(ref err)      => format!("Poison error: {}", err),
            Error::Toml(ref err)        => format!("TOML error: {}", err),
            Error::UrlParse(ref err)    => format!("Url parse error: {}", err),
            Error::Utf8(ref err)        => format!("Utf8 error: {}", err),

            Error::CryptoBadKey(ref err)              => format!("Bad key material: {}", err),
            Error::CryptoUnsupportedAlgorithm(ref err) => format!("Unsupported algorithm: {}", err),

            Error::VerifyExpired(ref role)         => format!("{}: metadata has expired", role),
            Error::VerifyThresholdNotMet(ref err)   => format!("Signature threshold not met: {}", err),
            Error::VerifyUnknownRole(ref err)       => format!("Unknown role: {}", err),
            Error::VerifyVersionRollback(ref err)   => format!("Version rollback detected: {}", err),
            Error::VerifyBadSignature(ref err)      => format!("Bad signature: {}", err),
            Error::VerifyMalformedDocument(ref err) => format!("Malformed signed document: {}", err),
            Error::VerifyHashMismatch(ref err)      => format!("Hash mismatch: {}", err),
            Error::VerifyLengthMismatch(ref err)    => format!("Length mismatch: {}", err),
            Error::VerifyDelegationCycle(ref err)   => format!("Delegation cycle detected: {}", err),

            Error::PlanUnknownEcu(ref id)          => format!("Unknown ECU serial: {}", id),
            Error::PlanTargetMismatch(ref err)     => format!("Director/Image target mismatch: {}", err),
            Error::PlanHardwareIdMismatch(ref err) => format!("Hardware id mismatch: {}", err),

            Error::FetchTransport(ref err)    => format!("Transport error: {}", err),
            Error::FetchNotFound(ref err)     => format!("Not found: {}", err),
            Error::FetchSizeExceeded(ref err) => format!("Size exceeded: {}", err),
            Error::FetchInterrupted           => "Fetch interrupted".into(),
            Error::FetchTimeout(ref err)      => format!("Timeout: {}", err),

            Error::SecondaryRejected(ref err) => format!("Secondary rejected request: {}", err),
            Error::Cancelled                  => "Operation cancelled".into(),
        };
        write!(f, "{}", inner)
    }
}

impl std::error::Error for Error {}

impl<E> From<PoisonError<E>> for Error {
    fn from(err: PoisonError<E>) -> Error {
        Error::Poison(err.to_string())
    }
}


macro_rules! derive_from {
    ([ $( $from: ident => $to: ident ),* ]) => {
        $(impl From<$from> for Error {
            fn from(err: $from) -> Error {
                Error::$to(err)
            }
        })*
    };
}

derive_from!([
    Base64Error      => Base64,
    ChronoParseError => DateTime,
    FromHexError     => Hex,
    FromUtf8Error    => FromUtf8,
    IoError          => Io,
    OpensslErrors    => Openssl,
    PemError         => Pem,
    SerdeJsonError   => Json,
    TomlError        => Toml,
    UrlParseError    => UrlParse,
    Utf8Error        => Utf8
]);
