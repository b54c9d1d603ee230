//! Versioned byte envelope for records and fragments crossing a worker
//! boundary.

use super::{ConvertError, ConvertResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Bumped whenever the serialised form of `Record` or `Fragment` changes.
pub const PARCEL_VERSION: u32 = 1;

#[derive(Serialize)]
struct Outgoing<'a, T> {
    version: u32,
    payload: &'a T,
}

#[derive(Deserialize)]
struct Incoming<T> {
    version: u32,
    payload: T,
}

#[derive(Deserialize)]
struct Header {
    version: u32,
}

/// Sealed, self-describing bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parcel {
    bytes: Vec<u8>,
}

impl Parcel {
    pub fn seal<T: Serialize>(value: &T) -> ConvertResult<Self> {
        let envelope = Outgoing {
            version: PARCEL_VERSION,
            payload: value,
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|e| ConvertError::Codec(e.to_string()))?;
        Ok(Self { bytes })
    }

    pub fn open<T: DeserializeOwned>(&self) -> ConvertResult<T> {
        let header: Header =
            serde_json::from_slice(&self.bytes).map_err(|e| ConvertError::Codec(e.to_string()))?;
        if header.version != PARCEL_VERSION {
            return Err(ConvertError::Codec(format!(
                "parcel version {} is not supported (expected {})",
                header.version, PARCEL_VERSION
            )));
        }
        let envelope: Incoming<T> =
            serde_json::from_slice(&self.bytes).map_err(|e| ConvertError::Codec(e.to_string()))?;
        debug_assert_eq!(envelope.version, PARCEL_VERSION);
        Ok(envelope.payload)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Fragment, Node};
    use crate::resource::Record;

    #[test]
    fn supplies_do_not_cross_the_boundary() {
        let mut record = Record::new("Person")
            .with_field("id", 1i64)
            .with_identifying(["id"]);
        record.set_supply("person", Fragment::from(Node::new(["Person"])));

        let opened: Vec<Record> = Parcel::seal(&vec![record]).unwrap().open().unwrap();

        assert_eq!(opened[0].identity(), "id=1");
        assert!(!opened[0].has_supplies());
    }

    #[test]
    fn fragments_keep_handles() {
        let node = Node::new(["Person"]).with_primary_key("ID");
        let handle = node.handle;
        let opened: Fragment = Parcel::seal(&Fragment::from(node)).unwrap().open().unwrap();
        assert_eq!(opened.nodes[0].handle, handle);
        assert_eq!(opened.nodes[0].primary_key.as_deref(), Some("ID"));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let parcel = Parcel::from_bytes(br#"{"version":99,"payload":[]}"#.to_vec());
        let err = parcel.open::<Vec<Record>>().unwrap_err();
        assert!(matches!(err, ConvertError::Codec(msg) if msg.contains("99")));
    }
}
