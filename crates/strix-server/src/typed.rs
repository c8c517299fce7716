//! Compile-time typed-handler adapter.
//!
//! Where the original runtime would reflect over a callback's signature,
//! here the parameter tuple is monomorphized: each positional parameter is
//! decoded into its declared type through serde, the callback runs, and the
//! return value is re-encoded into a JSON value for the result message.

use serde::de::DeserializeOwned;
use serde_json::Value;

use strix_jsonrpc::RpcError;

/// A parameter tuple decodable from a positional parameter sequence.
pub trait FromParams: Sized + Send {
    /// Number of declared parameters.
    fn arity() -> usize;

    fn from_params(params: &[Value]) -> Result<Self, RpcError>;
}

fn decode_param<T: DeserializeOwned>(params: &[Value], index: usize) -> Result<T, RpcError> {
    serde_json::from_value(params[index].clone()).map_err(|e| {
        RpcError::InvalidParams(format!("params {index} got unconvertible type: {e}"))
    })
}

impl FromParams for () {
    fn arity() -> usize {
        0
    }

    fn from_params(_params: &[Value]) -> Result<Self, RpcError> {
        Ok(())
    }
}

macro_rules! tuple_from_params {
    ($len:expr, $($ty:ident => $idx:tt),+) => {
        impl<$($ty: DeserializeOwned + Send),+> FromParams for ($($ty,)+) {
            fn arity() -> usize {
                $len
            }

            fn from_params(params: &[Value]) -> Result<Self, RpcError> {
                if params.len() < $len {
                    return Err(RpcError::InvalidParams("no enough params size".into()));
                }
                Ok(($(decode_param::<$ty>(params, $idx)?,)+))
            }
        }
    };
}

tuple_from_params!(1, A => 0);
tuple_from_params!(2, A => 0, B => 1);
tuple_from_params!(3, A => 0, B => 1, C => 2);
tuple_from_params!(4, A => 0, B => 1, C => 2, D => 3);
tuple_from_params!(5, A => 0, B => 1, C => 2, D => 3, E => 4);
tuple_from_params!(6, A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decodes_declared_types() {
        let (a, b): (i64, i64) = FromParams::from_params(&[json!(6), json!(3)]).unwrap();
        assert_eq!(a + b, 9);

        let (name, flags): (String, Vec<bool>) =
            FromParams::from_params(&[json!("x"), json!([true, false])]).unwrap();
        assert_eq!(name, "x");
        assert_eq!(flags, vec![true, false]);
    }

    #[test]
    fn test_too_few_params() {
        let res: Result<(i64, i64), _> = FromParams::from_params(&[json!(6)]);
        match res {
            Err(RpcError::InvalidParams(msg)) => assert_eq!(msg, "no enough params size"),
            other => panic!("expected invalid params, got {other:?}"),
        }
    }

    #[test]
    fn test_unconvertible_type_names_the_slot() {
        let res: Result<(i64, i64), _> = FromParams::from_params(&[json!("6"), json!(4)]);
        match res {
            Err(RpcError::InvalidParams(msg)) => {
                assert!(msg.starts_with("params 0 got unconvertible type"), "{msg}");
            }
            other => panic!("expected invalid params, got {other:?}"),
        }
        assert_eq!(
            RpcError::InvalidParams("x".into()).code(),
            -32602
        );
    }

    #[test]
    fn test_extra_params_are_ignored() {
        let (a,): (i64,) = FromParams::from_params(&[json!(1), json!("extra")]).unwrap();
        assert_eq!(a, 1);
    }

    #[test]
    fn test_structs_decode_via_serde() {
        #[derive(serde::Deserialize)]
        struct Point {
            x: i64,
            y: i64,
        }
        let (p,): (Point,) = FromParams::from_params(&[json!({"x": 1, "y": 2})]).unwrap();
        assert_eq!(p.x + p.y, 3);
    }
}
