//! Contract targets, deployment artifacts, and call encoding
//!
//! ABI descriptors are parsed and applied with `ethers::abi`. Arguments arrive
//! as text (from the CLI or a caller) and are tokenized against the parameter
//! types of the selected function or constructor.

use crate::error::{ExecutorError, ExecutorResult};

use ethers::abi::token::{LenientTokenizer, Tokenizer};
use ethers::abi::{Abi, Param, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::parse_units;
use std::path::Path;

/// A deployed contract: address plus ABI. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct ContractTarget {
    address: Address,
    abi: Abi,
}

/// A compiled contract ready for deployment
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    abi: Abi,
    bytecode: Bytes,
}

/// One invocation: method, textual arguments, and optional overrides
#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    pub method: String,
    pub args: Vec<String>,
    pub value: Option<U256>,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
}

/// Call data plus request overrides, ready for a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCall {
    /// `None` for contract creation
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: Option<U256>,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
}

impl CallRequest {
    pub fn new(method: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            method: method.into(),
            args,
            ..Default::default()
        }
    }

    /// Constructor arguments for a deployment
    pub fn constructor(args: Vec<String>) -> Self {
        Self::new("constructor", args)
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: U256) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_gas_price(mut self, gas_price: U256) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    fn encoded(&self, to: Option<Address>, data: Vec<u8>) -> EncodedCall {
        EncodedCall {
            to,
            data: Bytes::from(data),
            value: self.value,
            gas_limit: self.gas_limit,
            gas_price: self.gas_price,
        }
    }
}

impl ContractTarget {
    pub fn new(address: Address, abi: Abi) -> Self {
        Self { address, abi }
    }

    /// Build from a hex address and ABI JSON (a bare array or an artifact)
    pub fn from_json(address: &str, abi_json: &str) -> ExecutorResult<Self> {
        let address = parse_address(address)?;
        let value: serde_json::Value = serde_json::from_str(abi_json)
            .map_err(|e| ExecutorError::InvalidConfiguration(format!("Invalid ABI JSON: {}", e)))?;
        Ok(Self::new(address, abi_from_json(&value)?))
    }

    pub fn load(address: &str, abi_path: &Path) -> ExecutorResult<Self> {
        Self::from_json(address, &read_file(abi_path)?)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    /// Encode `request` as call data for this contract.
    ///
    /// Overloads are resolved by argument count.
    pub fn encode(&self, request: &CallRequest) -> ExecutorResult<EncodedCall> {
        let candidates = self.abi.functions_by_name(&request.method).map_err(|_| {
            ExecutorError::Encoding(format!("ABI has no function named '{}'", request.method))
        })?;

        let function = candidates
            .iter()
            .find(|f| f.inputs.len() == request.args.len())
            .ok_or_else(|| {
                ExecutorError::Encoding(format!(
                    "'{}' takes {} arguments, got {}",
                    request.method,
                    candidates
                        .iter()
                        .map(|f| f.inputs.len().to_string())
                        .collect::<Vec<_>>()
                        .join(" or "),
                    request.args.len()
                ))
            })?;

        let tokens = tokenize(&function.inputs, &request.args)?;
        let data = function
            .encode_input(&tokens)
            .map_err(|e| ExecutorError::Encoding(format!("{}: {}", request.method, e)))?;

        Ok(request.encoded(Some(self.address), data))
    }
}

impl ContractArtifact {
    pub fn new(abi: Abi, bytecode: Bytes) -> Self {
        Self { abi, bytecode }
    }

    /// Parse a Hardhat or Foundry artifact: `{ "abi": [...], "bytecode": ... }`
    pub fn from_json(artifact_json: &str) -> ExecutorResult<Self> {
        let value: serde_json::Value = serde_json::from_str(artifact_json).map_err(|e| {
            ExecutorError::InvalidConfiguration(format!("Invalid artifact JSON: {}", e))
        })?;

        let abi = abi_from_json(&value)?;

        // Foundry nests the hex under `bytecode.object`
        let bytecode = match value.get("bytecode") {
            Some(serde_json::Value::String(s)) => s.as_str(),
            Some(serde_json::Value::Object(map)) => map
                .get("object")
                .and_then(|o| o.as_str())
                .unwrap_or_default(),
            _ => "",
        };
        let bytecode = hex::decode(bytecode.trim_start_matches("0x")).map_err(|e| {
            ExecutorError::InvalidConfiguration(format!("Invalid artifact bytecode: {}", e))
        })?;
        if bytecode.is_empty() {
            return Err(ExecutorError::InvalidConfiguration(
                "Artifact has no bytecode (abstract contract or interface?)".to_string(),
            ));
        }

        Ok(Self::new(abi, Bytes::from(bytecode)))
    }

    pub fn load(path: &Path) -> ExecutorResult<Self> {
        Self::from_json(&read_file(path)?)
    }

    /// Creation data: bytecode followed by encoded constructor arguments
    pub fn encode_deployment(&self, request: &CallRequest) -> ExecutorResult<EncodedCall> {
        let data = match self.abi.constructor() {
            Some(constructor) => {
                if constructor.inputs.len() != request.args.len() {
                    return Err(ExecutorError::Encoding(format!(
                        "constructor takes {} arguments, got {}",
                        constructor.inputs.len(),
                        request.args.len()
                    )));
                }
                let tokens = tokenize(&constructor.inputs, &request.args)?;
                constructor
                    .encode_input(self.bytecode.to_vec(), &tokens)
                    .map_err(|e| ExecutorError::Encoding(format!("constructor: {}", e)))?
            }
            None if request.args.is_empty() => self.bytecode.to_vec(),
            None => {
                return Err(ExecutorError::Encoding(
                    "contract has no constructor but arguments were given".to_string(),
                ))
            }
        };

        Ok(request.encoded(None, data))
    }
}

/// Parse a wei amount: plain integer, `0x` hex, or a decimal with a unit
/// suffix such as `10ether` or `1.5 gwei`.
pub fn parse_amount(input: &str) -> ExecutorResult<U256> {
    let input = input.trim();
    let invalid = |e: String| ExecutorError::Encoding(format!("Invalid amount '{}': {}", input, e));

    if let Some(hex) = input.strip_prefix("0x") {
        return U256::from_str_radix(hex, 16).map_err(|e| invalid(e.to_string()));
    }

    const UNITS: [&str; 3] = ["ether", "gwei", "wei"];
    for unit in UNITS {
        if let Some(number) = input.strip_suffix(unit) {
            let parsed = parse_units(number.trim(), unit).map_err(|e| invalid(e.to_string()))?;
            return Ok(parsed.into());
        }
    }

    U256::from_dec_str(input).map_err(|e| invalid(e.to_string()))
}

fn parse_address(input: &str) -> ExecutorResult<Address> {
    input.trim().parse::<Address>().map_err(|e| {
        ExecutorError::InvalidConfiguration(format!("Invalid contract address '{}': {}", input, e))
    })
}

fn abi_from_json(value: &serde_json::Value) -> ExecutorResult<Abi> {
    let abi = match value {
        serde_json::Value::Array(_) => value.clone(),
        serde_json::Value::Object(map) => map.get("abi").cloned().ok_or_else(|| {
            ExecutorError::InvalidConfiguration("JSON object has no 'abi' key".to_string())
        })?,
        _ => {
            return Err(ExecutorError::InvalidConfiguration(
                "ABI must be a JSON array or an artifact object".to_string(),
            ))
        }
    };

    serde_json::from_value(abi)
        .map_err(|e| ExecutorError::InvalidConfiguration(format!("Invalid ABI: {}", e)))
}

fn tokenize(params: &[Param], args: &[String]) -> ExecutorResult<Vec<Token>> {
    params
        .iter()
        .zip(args)
        .map(|(param, arg)| match param.kind {
            // Allow unit suffixes for amounts
            ParamType::Uint(bits) => {
                let value = parse_amount(arg)?;
                if bits < 256 && value.bits() > bits {
                    return Err(ExecutorError::Encoding(format!(
                        "argument '{}' ({}): {} does not fit in {} bits",
                        param.name, param.kind, value, bits
                    )));
                }
                Ok(Token::Uint(value))
            }
            _ => LenientTokenizer::tokenize(&param.kind, arg).map_err(|e| {
                ExecutorError::Encoding(format!(
                    "argument '{}' ({}): {}",
                    param.name, param.kind, e
                ))
            }),
        })
        .collect()
}

fn read_file(path: &Path) -> ExecutorResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        ExecutorError::InvalidConfiguration(format!("Failed to read {}: {}", path.display(), e))
    })
}
