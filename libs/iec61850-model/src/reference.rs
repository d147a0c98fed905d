//! Object references
//!
//! Clients address nodes as
//! `<Device>/<LogicalNode>.<DataObject>[.<SubDataObject>].<DataAttribute>[.<SubAttribute>]`.
//! The device is separated by `/`, everything below it by `.`.

use errors::{IedError, IedResult};
use std::fmt;
use std::str::FromStr;

/// Parsed object reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectReference {
    device: String,
    /// Logical node name followed by the data object / attribute chain
    segments: Vec<String>,
}

impl ObjectReference {
    /// Parse a reference string
    ///
    /// ```
    /// # use iec61850_model::ObjectReference;
    /// let r = ObjectReference::parse("Battery/ZBAT.Vol.mag.f").unwrap();
    /// assert_eq!(r.device(), "Battery");
    /// assert_eq!(r.logical_node(), Some("ZBAT"));
    /// assert_eq!(r.segments().len(), 4);
    /// assert!(ObjectReference::parse("ZBAT.Vol").is_err());
    /// ```
    pub fn parse(s: &str) -> IedResult<Self> {
        let invalid = |reason: &str| IedError::InvalidReference(format!("'{s}': {reason}"));

        let (device, rest) = match s.split_once('/') {
            Some((device, rest)) => (device, Some(rest)),
            None => (s, None),
        };
        if device.is_empty() {
            return Err(invalid("missing logical device"));
        }
        if device.contains('.') {
            return Err(invalid("logical device must be followed by '/'"));
        }

        let segments: Vec<String> = match rest {
            None => Vec::new(),
            Some(rest) => rest.split('.').map(str::to_string).collect(),
        };
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err(invalid("empty name segment"));
        }
        if std::iter::once(device)
            .chain(segments.iter().map(String::as_str))
            .any(|seg| seg.contains('/') || seg.chars().any(char::is_whitespace))
        {
            return Err(invalid("illegal character"));
        }

        Ok(Self {
            device: device.to_string(),
            segments,
        })
    }

    /// Reference to a logical device
    pub fn device_only(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            segments: Vec::new(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn logical_node(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// Logical node followed by the data object / attribute chain
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Reference to a named child of this node
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self {
            device: self.device.clone(),
            segments,
        }
    }

    /// Same reference with another device name
    pub fn with_device(&self, device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            segments: self.segments.clone(),
        }
    }

    /// Whether `self` equals `other` or names one of its ancestors
    ///
    /// Only whole name segments count: `Vol.mag` covers `Vol.mag.f` but
    /// `Vol.ma` does not.
    pub fn covers(&self, other: &ObjectReference) -> bool {
        self.device == other.device
            && self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.device)?;
        for (i, seg) in self.segments.iter().enumerate() {
            f.write_str(if i == 0 { "/" } else { "." })?;
            f.write_str(seg)?;
        }
        Ok(())
    }
}

impl FromStr for ObjectReference {
    type Err = IedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_display_restores_separators() {
        for s in [
            "Battery",
            "Battery/ZBAT",
            "Battery/ZBAT.Vol.mag.f",
            "testmodelBattery/ZBAT.NamPlt.vendor",
        ] {
            assert_eq!(ObjectReference::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_invalid_references() {
        for s in [
            "",
            "/ZBAT",
            "Battery/",
            "Battery/ZBAT..Vol",
            "Battery/ZBAT.Vol.",
            "Battery/ZBAT/Vol",
            "Battery/ZBAT.Vol mag",
            "Battery.ZBAT",
        ] {
            assert!(
                matches!(ObjectReference::parse(s), Err(IedError::InvalidReference(_))),
                "{s} should be rejected"
            );
        }
    }

    #[test]
    fn test_covers_whole_segments() {
        let vol = ObjectReference::parse("Battery/ZBAT.Vol").unwrap();
        let f = ObjectReference::parse("Battery/ZBAT.Vol.mag.f").unwrap();
        let volt = ObjectReference::parse("Battery/ZBAT.VolChgRte.mag.f").unwrap();
        assert!(vol.covers(&f));
        assert!(vol.covers(&vol));
        assert!(!f.covers(&vol));
        assert!(!vol.covers(&volt));
    }

    #[test]
    fn test_child() {
        let r = ObjectReference::device_only("Battery").child("ZBAT").child("Vol");
        assert_eq!(r.to_string(), "Battery/ZBAT.Vol");
        assert_eq!(r.with_device("X").to_string(), "X/ZBAT.Vol");
    }
}
