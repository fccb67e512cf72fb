use std::collections::HashMap;

use super::OpSize;

/// A foreign function the embedder registered before compilation. The
/// address is the handle the VM's loader resolved; the compiler only routes
/// it into `ffi` instructions.
#[derive(Clone, Debug)]
pub struct ForeignFunction {
    pub symbol: String,
    pub address: u64,
    pub is_variadic: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FfiArgument {
    pub size: OpSize,
    pub is_float: bool,
}

/// Argument metadata for one variadic call site, recovered by the FFI layer
/// at dispatch time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallSignature {
    pub arguments: Vec<FfiArgument>,
}

#[derive(Default)]
pub struct Ffi {
    functions: Vec<ForeignFunction>,
    by_symbol: HashMap<String, usize>,
    by_address: HashMap<u64, usize>,
    signatures: Vec<CallSignature>,
    next_address: u64,
}

impl Ffi {
    /// Register a resolvable foreign symbol; returns its handle address.
    pub fn register_function(&mut self, symbol: &str, is_variadic: bool) -> u64 {
        if let Some(&index) = self.by_symbol.get(symbol) {
            return self.functions[index].address;
        }
        self.next_address += 1;
        let address = self.next_address;
        let index = self.functions.len();
        self.functions.push(ForeignFunction {
            symbol: symbol.to_string(),
            address,
            is_variadic,
        });
        self.by_symbol.insert(symbol.to_string(), index);
        self.by_address.insert(address, index);
        address
    }

    pub fn find_function(&self, address: u64) -> Option<&ForeignFunction> {
        self.by_address.get(&address).map(|&i| &self.functions[i])
    }

    pub fn find_by_symbol(&self, symbol: &str) -> Option<&ForeignFunction> {
        self.by_symbol.get(symbol).map(|&i| &self.functions[i])
    }

    pub fn is_variadic(&self, address: u64) -> bool {
        self.find_function(address)
            .map(|f| f.is_variadic)
            .unwrap_or(false)
    }

    /// Allocate a signature id for one variadic call site.
    pub fn register_call_signature(&mut self, signature: CallSignature) -> u64 {
        let id = self.signatures.len() as u64;
        self.signatures.push(signature);
        id
    }

    pub fn call_signature(&self, id: u64) -> Option<&CallSignature> {
        self.signatures.get(id as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_round_trips_by_address_and_symbol() {
        let mut ffi = Ffi::default();
        let address = ffi.register_function("print", true);
        assert_eq!(ffi.register_function("print", true), address);
        assert_eq!(ffi.find_function(address).map(|f| f.symbol.as_str()), Some("print"));
        assert!(ffi.is_variadic(address));
        assert!(ffi.find_by_symbol("missing").is_none());
    }

    #[test]
    fn signature_ids_are_per_call_site() {
        let mut ffi = Ffi::default();
        let a = ffi.register_call_signature(CallSignature {
            arguments: vec![FfiArgument {
                size: OpSize::Qword,
                is_float: false,
            }],
        });
        let b = ffi.register_call_signature(CallSignature::default());
        assert_ne!(a, b);
        assert_eq!(ffi.call_signature(a).map(|s| s.arguments.len()), Some(1));
    }
}
