//! ABI event descriptions and the log decoder.
//!
//! Contract ABIs are registered once by label; addresses are bound to labels
//! at startup (static contracts) or mid-run (factory children). Decoding a
//! raw [`LogEnvelope`] yields a typed [`Event`] with arguments keyed by ABI
//! input name.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{keccak256, Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use logforge_core::handler::Event;
use logforge_core::types::LogEnvelope;
use logforge_core::IndexError;

// ─── ParamKind ───────────────────────────────────────────────────────────────

/// The Solidity type of a single event input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ParamKind {
    Address,
    /// `uintN`, N in 8..=256 and a multiple of 8.
    Uint(u16),
    /// `intN`, N in 8..=256 and a multiple of 8.
    Int(u16),
    Bool,
    /// `bytesN`, N in 1..=32.
    FixedBytes(u8),
    Bytes,
    Str,
}

impl ParamKind {
    /// Dynamic types are keccak-hashed when used as indexed topics; their
    /// original value is unrecoverable from the log.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Bytes | Self::Str)
    }

    fn sol_type(&self) -> DynSolType {
        match *self {
            Self::Address => DynSolType::Address,
            Self::Uint(bits) => DynSolType::Uint(bits as usize),
            Self::Int(bits) => DynSolType::Int(bits as usize),
            Self::Bool => DynSolType::Bool,
            Self::FixedBytes(size) => DynSolType::FixedBytes(size as usize),
            Self::Bytes => DynSolType::Bytes,
            Self::Str => DynSolType::String,
        }
    }
}

impl std::fmt::Display for ParamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Address => write!(f, "address"),
            Self::Uint(bits) => write!(f, "uint{bits}"),
            Self::Int(bits) => write!(f, "int{bits}"),
            Self::Bool => write!(f, "bool"),
            Self::FixedBytes(size) => write!(f, "bytes{size}"),
            Self::Bytes => write!(f, "bytes"),
            Self::Str => write!(f, "string"),
        }
    }
}

impl FromStr for ParamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "address" => return Ok(Self::Address),
            "bool" => return Ok(Self::Bool),
            "bytes" => return Ok(Self::Bytes),
            "string" => return Ok(Self::Str),
            "uint" => return Ok(Self::Uint(256)),
            "int" => return Ok(Self::Int(256)),
            _ => {}
        }
        if let Some(bits) = s.strip_prefix("uint") {
            let bits: u16 = bits.parse().map_err(|_| format!("bad type: {s}"))?;
            if bits == 0 || bits > 256 || bits % 8 != 0 {
                return Err(format!("bad uint width: {s}"));
            }
            return Ok(Self::Uint(bits));
        }
        if let Some(bits) = s.strip_prefix("int") {
            let bits: u16 = bits.parse().map_err(|_| format!("bad type: {s}"))?;
            if bits == 0 || bits > 256 || bits % 8 != 0 {
                return Err(format!("bad int width: {s}"));
            }
            return Ok(Self::Int(bits));
        }
        if let Some(size) = s.strip_prefix("bytes") {
            let size: u8 = size.parse().map_err(|_| format!("bad type: {s}"))?;
            if size == 0 || size > 32 {
                return Err(format!("bad bytes width: {s}"));
            }
            return Ok(Self::FixedBytes(size));
        }
        Err(format!("unsupported type: {s}"))
    }
}

impl TryFrom<String> for ParamKind {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ParamKind> for String {
    fn from(k: ParamKind) -> String {
        k.to_string()
    }
}

// ─── Event ABI ───────────────────────────────────────────────────────────────

/// One input of an event ABI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventInput {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamKind,
    #[serde(default)]
    pub indexed: bool,
}

impl EventInput {
    pub fn new(name: impl Into<String>, kind: ParamKind, indexed: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            indexed,
        }
    }
}

/// A single event ABI — everything needed to recognize and decode its logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAbi {
    pub name: String,
    pub inputs: Vec<EventInput>,
}

impl EventAbi {
    pub fn new(name: impl Into<String>, inputs: Vec<EventInput>) -> Self {
        Self {
            name: name.into(),
            inputs,
        }
    }

    /// Canonical signature, e.g. `Trade(address,uint256,bool)`.
    pub fn signature(&self) -> String {
        let types: Vec<String> = self.inputs.iter().map(|i| i.kind.to_string()).collect();
        format!("{}({})", self.name, types.join(","))
    }

    /// `topics[0]` of every log this event emits: `keccak256(signature)`.
    pub fn topic0(&self) -> String {
        let hash = keccak256(self.signature().as_bytes());
        format!("0x{}", hex::encode(hash))
    }

    /// Decode a raw log against this ABI. Indexed inputs come from topics
    /// (in declaration order), non-indexed inputs from the data section.
    pub fn decode(&self, log: &LogEnvelope) -> Result<serde_json::Map<String, Value>, IndexError> {
        let context = || format!("{} at {}", self.name, log.address);

        let indexed: Vec<&EventInput> = self.inputs.iter().filter(|i| i.indexed).collect();
        let plain: Vec<&EventInput> = self.inputs.iter().filter(|i| !i.indexed).collect();

        // topics[0] is the signature hash; indexed args follow.
        if log.topics.len() != indexed.len() + 1 {
            return Err(IndexError::Decode {
                context: context(),
                reason: format!(
                    "expected {} topics, log has {}",
                    indexed.len() + 1,
                    log.topics.len()
                ),
            });
        }

        let mut fields = serde_json::Map::new();

        for (input, topic) in indexed.iter().zip(log.topics.iter().skip(1)) {
            let word = decode_hex(topic).map_err(|reason| IndexError::Decode {
                context: context(),
                reason,
            })?;
            if word.len() != 32 {
                return Err(IndexError::Decode {
                    context: context(),
                    reason: format!("topic is {} bytes, expected 32", word.len()),
                });
            }
            let value = if input.kind.is_dynamic() {
                // Only the hash of the value is on-chain.
                Value::String(format!("0x{}", hex::encode(&word)))
            } else {
                let decoded = input.kind.sol_type().abi_decode(&word).map_err(|e| {
                    IndexError::Decode {
                        context: context(),
                        reason: e.to_string(),
                    }
                })?;
                to_json(&decoded)
            };
            fields.insert(input.name.clone(), value);
        }

        if !plain.is_empty() {
            let data = decode_hex(&log.data).map_err(|reason| IndexError::Decode {
                context: context(),
                reason,
            })?;
            let tuple = DynSolType::Tuple(plain.iter().map(|i| i.kind.sol_type()).collect());
            let decoded = tuple.abi_decode(&data).map_err(|e| IndexError::Decode {
                context: context(),
                reason: e.to_string(),
            })?;
            let DynSolValue::Tuple(values) = decoded else {
                return Err(IndexError::Decode {
                    context: context(),
                    reason: "data did not decode to a tuple".into(),
                });
            };
            for (input, value) in plain.iter().zip(values.iter()) {
                fields.insert(input.name.clone(), to_json(value));
            }
        }

        Ok(fields)
    }
}

/// All event ABIs of one contract, under its registry label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractAbi {
    pub label: String,
    pub events: Vec<EventAbi>,
}

impl ContractAbi {
    pub fn new(label: impl Into<String>, events: Vec<EventAbi>) -> Self {
        Self {
            label: label.into(),
            events,
        }
    }

    pub fn event_by_topic0(&self, topic0: &str) -> Option<&EventAbi> {
        self.events
            .iter()
            .find(|e| e.topic0().eq_ignore_ascii_case(topic0))
    }

    pub fn event(&self, name: &str) -> Option<&EventAbi> {
        self.events.iter().find(|e| e.name == name)
    }
}

// ─── AbiRegistry ─────────────────────────────────────────────────────────────

/// Registry of contract ABIs and of (chain, address) → label bindings.
///
/// ABIs are fixed at startup; bindings grow at runtime as factories announce
/// children, so they sit behind a lock.
#[derive(Default)]
pub struct AbiRegistry {
    contracts: HashMap<String, ContractAbi>,
    bindings: RwLock<HashMap<(u64, String), String>>,
}

impl AbiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contract ABI under its label. Last registration wins.
    pub fn add_contract(&mut self, abi: ContractAbi) {
        self.contracts.insert(abi.label.clone(), abi);
    }

    pub fn contract(&self, label: &str) -> Option<&ContractAbi> {
        self.contracts.get(label)
    }

    /// Bind an on-chain address to a contract label.
    pub fn bind(&self, chain_id: u64, address: &str, label: &str) {
        self.bindings
            .write()
            .unwrap()
            .insert((chain_id, address.to_ascii_lowercase()), label.to_string());
    }

    /// The label bound at `address`, if any.
    pub fn label_at(&self, chain_id: u64, address: &str) -> Option<String> {
        self.bindings
            .read()
            .unwrap()
            .get(&(chain_id, address.to_ascii_lowercase()))
            .cloned()
    }

    /// Decode a raw log into a typed event.
    ///
    /// Returns `Ok(None)` when the emitting address is unbound or the
    /// signature hash matches no event of the bound contract — both are
    /// routine (other people's logs, unindexed events), not errors.
    pub fn decode_log(&self, log: &LogEnvelope) -> Result<Option<Event>, IndexError> {
        let Some(label) = self.label_at(log.chain_id, &log.address) else {
            return Ok(None);
        };
        let Some(contract) = self.contracts.get(&label) else {
            return Ok(None);
        };
        let Some(topic0) = log.topic0() else {
            return Ok(None);
        };
        let Some(event_abi) = contract.event_by_topic0(topic0) else {
            return Ok(None);
        };

        let fields = event_abi.decode(log)?;

        Ok(Some(Event {
            chain_id: log.chain_id,
            contract: label,
            name: event_abi.name.clone(),
            address: log.address.to_ascii_lowercase(),
            block_number: log.block_number,
            block_hash: log.block_hash.clone(),
            tx_hash: log.tx_hash.clone(),
            tx_index: log.tx_index,
            log_index: log.log_index,
            fields,
        }))
    }
}

// ─── Call encoding ───────────────────────────────────────────────────────────

/// An argument to a read-only contract call.
#[derive(Debug, Clone)]
pub enum CallArg {
    Address(Address),
    Uint(U256),
    Bool(bool),
}

/// ABI-encode a call: 4-byte selector from `signature` plus one 32-byte word
/// per argument. Covers the value-typed reads handlers make; dynamic
/// arguments are out of scope.
pub fn encode_call(signature: &str, args: &[CallArg]) -> String {
    let selector = keccak256(signature.as_bytes());
    let mut out = Vec::with_capacity(4 + args.len() * 32);
    out.extend_from_slice(&selector[..4]);
    for arg in args {
        let mut word = [0u8; 32];
        match arg {
            CallArg::Address(a) => word[12..].copy_from_slice(a.as_slice()),
            CallArg::Uint(v) => word = v.to_be_bytes::<32>(),
            CallArg::Bool(b) => word[31] = *b as u8,
        }
        out.extend_from_slice(&word);
    }
    format!("0x{}", hex::encode(out))
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn decode_hex(s: &str) -> Result<Vec<u8>, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| format!("bad hex: {e}"))
}

/// Normalize a decoded Solidity value to JSON. Numbers wider than 53 bits
/// would lose precision as JSON numbers, so `uint`/`int` become decimal
/// strings unconditionally.
fn to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Address(a) => Value::String(format!("0x{}", hex::encode(a.as_slice()))),
        DynSolValue::Uint(v, _) => Value::String(v.to_string()),
        DynSolValue::Int(v, _) => Value::String(v.to_string()),
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word.as_slice()[..*size])))
        }
        DynSolValue::Bytes(b) => Value::String(format!("0x{}", hex::encode(b))),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Tuple(vals) | DynSolValue::Array(vals) | DynSolValue::FixedArray(vals) => {
            Value::Array(vals.iter().map(to_json).collect())
        }
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_abi() -> EventAbi {
        EventAbi::new(
            "Transfer",
            vec![
                EventInput::new("from", ParamKind::Address, true),
                EventInput::new("to", ParamKind::Address, true),
                EventInput::new("value", ParamKind::Uint(256), false),
            ],
        )
    }

    #[test]
    fn param_kind_parse_and_display() {
        assert_eq!("uint256".parse::<ParamKind>().unwrap(), ParamKind::Uint(256));
        assert_eq!("address".parse::<ParamKind>().unwrap(), ParamKind::Address);
        assert_eq!("bytes32".parse::<ParamKind>().unwrap(), ParamKind::FixedBytes(32));
        assert_eq!("bytes".parse::<ParamKind>().unwrap(), ParamKind::Bytes);
        assert_eq!("string".parse::<ParamKind>().unwrap(), ParamKind::Str);
        assert_eq!("uint".parse::<ParamKind>().unwrap(), ParamKind::Uint(256));
        assert!("uint255".parse::<ParamKind>().is_err());
        assert!("bytes33".parse::<ParamKind>().is_err());
        assert!("float".parse::<ParamKind>().is_err());
        assert_eq!(ParamKind::Uint(128).to_string(), "uint128");
    }

    #[test]
    fn canonical_signature_and_topic0() {
        let abi = transfer_abi();
        assert_eq!(abi.signature(), "Transfer(address,address,uint256)");
        // The well-known ERC-20 Transfer hash.
        assert_eq!(
            abi.topic0(),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    fn transfer_log() -> LogEnvelope {
        LogEnvelope {
            chain_id: 1,
            block_number: 100,
            block_hash: "0xb100".into(),
            parent_hash: String::new(),
            tx_hash: "0xt1".into(),
            tx_index: 0,
            log_index: 0,
            address: "0xToken000000000000000000000000000000000001".into(),
            topics: vec![
                "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef".into(),
                format!("0x{:0>64}", "aa11000000000000000000000000000000000001"),
                format!("0x{:0>64}", "bb22000000000000000000000000000000000002"),
            ],
            // value = 1000
            data: format!("0x{:0>64}", "3e8"),
        }
    }

    #[test]
    fn decode_indexed_and_plain_inputs() {
        let fields = transfer_abi().decode(&transfer_log()).unwrap();
        assert_eq!(
            fields["from"],
            Value::String("0xaa11000000000000000000000000000000000001".into())
        );
        assert_eq!(
            fields["to"],
            Value::String("0xbb22000000000000000000000000000000000002".into())
        );
        assert_eq!(fields["value"], Value::String("1000".into()));
    }

    #[test]
    fn topic_count_mismatch_is_decode_error() {
        let mut log = transfer_log();
        log.topics.pop();
        let err = transfer_abi().decode(&log).unwrap_err();
        assert!(matches!(err, IndexError::Decode { .. }));
    }

    #[test]
    fn indexed_dynamic_input_kept_as_hash() {
        let abi = EventAbi::new(
            "Named",
            vec![EventInput::new("name", ParamKind::Str, true)],
        );
        let hash = "0x1111111111111111111111111111111111111111111111111111111111111111";
        let log = LogEnvelope {
            topics: vec![abi.topic0(), hash.into()],
            data: "0x".into(),
            ..transfer_log()
        };
        let fields = abi.decode(&log).unwrap();
        assert_eq!(fields["name"], Value::String(hash.into()));
    }

    #[test]
    fn registry_decodes_bound_address_only() {
        let mut registry = AbiRegistry::new();
        registry.add_contract(ContractAbi::new("Token", vec![transfer_abi()]));
        let log = transfer_log();

        // Unbound address: skip, not error.
        assert!(registry.decode_log(&log).unwrap().is_none());

        registry.bind(1, &log.address, "Token");
        let event = registry.decode_log(&log).unwrap().unwrap();
        assert_eq!(event.contract, "Token");
        assert_eq!(event.name, "Transfer");
        assert_eq!(event.address, log.address.to_ascii_lowercase());
        assert_eq!(event.fields["value"], Value::String("1000".into()));
    }

    #[test]
    fn registry_skips_unknown_topic0() {
        let mut registry = AbiRegistry::new();
        registry.add_contract(ContractAbi::new("Token", vec![transfer_abi()]));
        let mut log = transfer_log();
        registry.bind(1, &log.address, "Token");
        log.topics[0] = format!("0x{:0>64}", "beef");
        assert!(registry.decode_log(&log).unwrap().is_none());
    }

    #[test]
    fn call_encoding_selector_and_words() {
        let owner: Address = "0xaa11000000000000000000000000000000000001"
            .parse()
            .unwrap();
        let data = encode_call("balanceOf(address)", &[CallArg::Address(owner)]);
        // keccak256("balanceOf(address)")[..4] == 70a08231
        assert!(data.starts_with("0x70a08231"));
        assert_eq!(data.len(), 2 + 8 + 64);
        assert!(data.ends_with("aa11000000000000000000000000000000000001"));

        let data = encode_call("positions(uint256)", &[CallArg::Uint(U256::from(7u64))]);
        assert!(data.ends_with(&format!("{:0>64}", "7")));
    }
}
