//! Named coupling variables on top of a federate's handles.
//!
//! Participants address coupling variables by name; the channel keeps the
//! name-to-handle maps and the packed value-plus-flag codec.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use cosim_env::{Federate, InputId, PublicationId, Reading, Value, ValueKind};

use crate::error::CouplingError;

/// A coupling value with the publisher's local convergence bit riding along.
///
/// Wire form: `"{value:18.16},{0|1}"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CouplingSample {
    pub value: f64,
    pub converged: bool,
}

impl CouplingSample {
    pub fn new(value: f64, converged: bool) -> Self {
        Self { value, converged }
    }

    /// Encodes the sample as text.
    pub fn encode(&self) -> String {
        format!("{:18.16},{}", self.value, u8::from(self.converged))
    }

    /// Decodes a sample. A bare number decodes with `converged = false`.
    pub fn decode(text: &str) -> Result<Self, CouplingError> {
        let (value_part, flag_part) = match text.split_once(',') {
            Some((v, f)) => (v, Some(f)),
            None => (text, None),
        };
        let value: f64 = value_part
            .trim()
            .parse()
            .map_err(|_| CouplingError::codec(format!("bad coupling value in {text:?}")))?;
        let converged = match flag_part {
            None => false,
            Some(flag) => {
                let flag: i64 = flag
                    .trim()
                    .parse()
                    .map_err(|_| CouplingError::codec(format!("bad convergence flag in {text:?}")))?;
                flag != 0
            }
        };
        Ok(Self { value, converged })
    }

    /// Extracts a sample from any published value.
    ///
    /// Numeric values carry no flag and decode as unconverged.
    pub fn from_value(value: &Value) -> Result<Self, CouplingError> {
        match value {
            Value::Text(text) => Self::decode(text),
            other => other
                .as_f64()
                .map(|v| Self::new(v, false))
                .ok_or_else(|| CouplingError::codec(format!("not a coupling value: {other}"))),
        }
    }
}

impl fmt::Display for CouplingSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for CouplingSample {
    type Err = CouplingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Publish/read of named coupling variables through an owned federate.
pub struct CouplingChannel<F: Federate> {
    federate: F,
    outputs: BTreeMap<String, PublicationId>,
    inputs: BTreeMap<String, InputId>,
}

impl<F: Federate> CouplingChannel<F> {
    /// Wraps a federate. Nothing is registered yet.
    pub fn new(federate: F) -> Self {
        Self {
            federate,
            outputs: BTreeMap::new(),
            inputs: BTreeMap::new(),
        }
    }

    /// Registers an output under `name` (also used as the federation key).
    pub fn add_output(&mut self, name: &str, kind: ValueKind) -> Result<PublicationId, CouplingError> {
        let id = self.federate.register_publication(name, kind)?;
        self.outputs.insert(name.to_string(), id);
        Ok(id)
    }

    /// Registers an input named `name` subscribed to the key `target`.
    pub fn add_input(&mut self, name: &str, target: &str) -> Result<InputId, CouplingError> {
        let id = self.federate.register_subscription(target)?;
        self.inputs.insert(name.to_string(), id);
        Ok(id)
    }

    /// Names of the registered inputs, in name order.
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    pub fn publish(&mut self, name: &str, value: Value) -> Result<(), CouplingError> {
        let id = *self
            .outputs
            .get(name)
            .ok_or_else(|| CouplingError::unknown_variable(name))?;
        self.federate.publish(id, value)?;
        Ok(())
    }

    /// Reads an input; the updated flag is cleared by the read.
    pub fn read(&mut self, name: &str) -> Result<Reading, CouplingError> {
        let id = *self
            .inputs
            .get(name)
            .ok_or_else(|| CouplingError::unknown_variable(name))?;
        Ok(self.federate.read(id)?)
    }

    pub fn publish_sample(&mut self, name: &str, sample: CouplingSample) -> Result<(), CouplingError> {
        self.publish(name, Value::Text(sample.encode()))
    }

    /// Reads and decodes an input.
    ///
    /// # Returns
    /// `None` if nothing was ever delivered, otherwise the sample and its
    /// updated flag.
    pub fn read_sample(&mut self, name: &str) -> Result<Option<(CouplingSample, bool)>, CouplingError> {
        let reading = self.read(name)?;
        match reading.value {
            None => Ok(None),
            Some(value) => Ok(Some((CouplingSample::from_value(&value)?, reading.updated))),
        }
    }

    pub fn federate(&self) -> &F {
        &self.federate
    }

    pub fn federate_mut(&mut self) -> &mut F {
        &mut self.federate
    }

    pub fn into_inner(self) -> F {
        self.federate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_wire_format() {
        let sample = CouplingSample::new(0.5, true);
        assert_eq!(sample.encode(), "0.5000000000000000,1");

        let sample = CouplingSample::new(-0.25, false);
        assert_eq!(sample.encode(), "-0.2500000000000000,0");
    }

    #[test]
    fn test_sample_decode_variants() {
        let padded: CouplingSample = "  1.2500000000000000,1".parse().unwrap();
        assert_eq!(padded, CouplingSample::new(1.25, true));

        // Plain numbers carry no flag
        let bare = CouplingSample::decode("3.5").unwrap();
        assert!(!bare.converged);

        assert!(CouplingSample::decode("abc,1").is_err());
        assert!(CouplingSample::decode("1.0,x").is_err());
    }

    #[test]
    fn test_sample_from_numeric_value() {
        let s = CouplingSample::from_value(&Value::Double(2.0)).unwrap();
        assert_eq!(s, CouplingSample::new(2.0, false));
    }
}
