//! ParameterDescription.
//!
//! The other extended-protocol replies (ParseComplete, BindComplete,
//! CloseComplete, NoData, PortalSuspended) carry no payload and are matched
//! on their type byte alone.

use crate::error::Result;
use crate::protocol::codec::{read_u16, read_u32};
use crate::protocol::types::Oid;

/// ParameterDescription message - parameter type OIDs of a prepared statement.
#[derive(Debug, Clone)]
pub struct ParameterDescription {
    param_oids: Vec<Oid>,
}

impl ParameterDescription {
    /// Parse a ParameterDescription message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (count, mut data) = read_u16(payload)?;
        let mut param_oids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (oid, rest) = read_u32(data)?;
            param_oids.push(oid);
            data = rest;
        }
        Ok(Self { param_oids })
    }

    pub fn oids(&self) -> &[Oid] {
        &self.param_oids
    }

    pub fn into_oids(self) -> Vec<Oid> {
        self.param_oids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_oids() {
        let payload = [0, 2, 0, 0, 0, 23, 0, 0, 0, 25];
        assert_eq!(ParameterDescription::parse(&payload).unwrap().oids(), &[23, 25]);
        assert!(ParameterDescription::parse(&[0, 1, 0]).is_err());
    }
}
