use chrono::{DateTime, Utc};
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::ops::Deref;
use std::str::FromStr;

use datatype::install::InstallOutcome;
use datatype::tuf::TufImage;
use datatype::Error;


macro_rules! newtype_string {
    ($name: ident) => {
        #[derive(PartialEq, Eq, Hash, Debug, Clone, Ord, PartialOrd)]
        pub struct $name(pub String);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> { Ok($name(s.to_string())) }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str { &self.0 }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
                Ok($name(String::deserialize(de)?))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
                ser.serialize_str(&self.0)
            }
        }
    };
}

/// Opaque identifier of a single ECU, primary or secondary.
newtype_string!(EcuSerial);

/// Opaque identifier of the hardware platform a target is built for.
newtype_string!(HardwareIdentifier);


/// Extra fields Uptane attaches to an ECU's manifest entry beyond plain
/// TUF.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct EcuCustom {
    pub outcome: InstallOutcome,
}

/// One ECU's contribution to the aggregate device manifest: what it has
/// installed, when it last talked to the timeserver, and the outcome of
/// its last install attempt.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct EcuVersion {
    pub ecu_serial: EcuSerial,
    pub hardware_id: HardwareIdentifier,
    pub installed_image: TufImage,
    pub previous_timeserver_time: DateTime<Utc>,
    pub timeserver_time: DateTime<Utc>,
    pub attacks_detected: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<EcuCustom>,
    /// Anti-replay nonce the server must see change between submissions
    ///.
    pub nonce: String,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecu_serial_display_and_parse() {
        let serial: EcuSerial = "ecu-001".parse().unwrap();
        assert_eq!(serial.to_string(), "ecu-001");
        assert_eq!(&*serial, "ecu-001");
    }

    #[test]
    fn test_ecu_serial_ordering_is_lexical() {
        let mut serials = vec![EcuSerial("b".into()), EcuSerial("a".into())];
        serials.sort();
        assert_eq!(serials, vec![EcuSerial("a".into()), EcuSerial("b".into())]);
    }
}
