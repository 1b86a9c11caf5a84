//! Wasm module validation: ABI compatibility checks.
//!
//! Validates that a compiled module can be driven by [`WasmBackend`](super::WasmBackend)
//! before anything is instantiated. Checks:
//!
//! 1. Memory export present
//! 2. `__indirect_function_table`, if exported, is a funcref table
//! 3. No WASI imports
//! 4. All imports are functions from `rampart_host`, and only the known ones

use wasmtime::{ExternType, Module, RefType, ValType};

use crate::error::SandboxError;

/// Allowed import module name.
pub const HOST_MODULE: &str = "rampart_host";

/// Export holding the linear memory.
pub const MEMORY_EXPORT: &str = "memory";

/// Export holding the function table, as emitted by wasm32 C toolchains.
pub const TABLE_EXPORT: &str = "__indirect_function_table";

/// Imports the backend provides: (name, param_count_of_i32, result_count_of_i32).
const HOST_IMPORTS: &[(&str, usize, usize)] = &[("malloc", 1, 1), ("free", 1, 0)];

fn is_i32(vt: &ValType) -> bool {
    matches!(vt, ValType::I32)
}

/// Validate that a module meets the backend's ABI requirements.
pub fn validate_module(module: &Module) -> Result<(), SandboxError> {
    validate_exports(module)?;
    validate_imports(module)?;
    Ok(())
}

fn validate_exports(module: &Module) -> Result<(), SandboxError> {
    let has_memory = module
        .exports()
        .any(|e| e.name() == MEMORY_EXPORT && matches!(e.ty(), ExternType::Memory(_)));
    if !has_memory {
        return Err(SandboxError::Validation(format!(
            "module must export '{}'",
            MEMORY_EXPORT
        )));
    }

    if let Some(export) = module.exports().find(|e| e.name() == TABLE_EXPORT) {
        let is_funcref = match export.ty() {
            ExternType::Table(t) => t.element().matches(&RefType::FUNCREF),
            _ => false,
        };
        if !is_funcref {
            return Err(SandboxError::Validation(format!(
                "export '{}' must be a funcref table",
                TABLE_EXPORT
            )));
        }
    }

    Ok(())
}

/// Check that all imports are known `rampart_host` functions and none are WASI.
fn validate_imports(module: &Module) -> Result<(), SandboxError> {
    for import in module.imports() {
        let module_name = import.module();

        if module_name.starts_with("wasi") {
            return Err(SandboxError::Validation(format!(
                "WASI import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }

        if module_name != HOST_MODULE {
            return Err(SandboxError::Validation(format!(
                "import from unknown module '{}' (only '{}' allowed): {}",
                module_name,
                HOST_MODULE,
                import.name()
            )));
        }

        let func_ty = match import.ty() {
            ExternType::Func(ft) => ft,
            _ => {
                return Err(SandboxError::Validation(format!(
                    "non-function import not allowed: {}::{}",
                    module_name,
                    import.name()
                )));
            }
        };

        let &(_, param_count, result_count) = HOST_IMPORTS
            .iter()
            .find(|(name, _, _)| *name == import.name())
            .ok_or_else(|| {
                SandboxError::Validation(format!("unknown host import: {}::{}", module_name, import.name()))
            })?;

        let params: Vec<ValType> = func_ty.params().collect();
        let results: Vec<ValType> = func_ty.results().collect();
        if params.len() != param_count
            || !params.iter().all(is_i32)
            || results.len() != result_count
            || !results.iter().all(is_i32)
        {
            return Err(SandboxError::Validation(format!(
                "host import '{}' has the wrong signature",
                import.name()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::Engine;

    fn module(wat: &str) -> Module {
        Module::new(&Engine::default(), wat).unwrap()
    }

    #[test]
    fn test_validate_minimal_valid_module() {
        let m = module(
            r#"
            (module
                (memory (export "memory") 1)
                (func (export "answer") (result i32) i32.const 42)
            )
        "#,
        );
        validate_module(&m).unwrap();
    }

    #[test]
    fn test_reject_missing_memory() {
        let m = module(r#"(module (func (export "answer") (result i32) i32.const 42))"#);
        let err = validate_module(&m).unwrap_err();
        assert!(matches!(err, SandboxError::Validation(_)));
    }

    #[test]
    fn test_accept_function_table() {
        let m = module(
            r#"
            (module
                (memory (export "memory") 1)
                (table (export "__indirect_function_table") 1 funcref)
            )
        "#,
        );
        validate_module(&m).unwrap();
    }

    #[test]
    fn test_reject_externref_table() {
        let m = module(
            r#"
            (module
                (memory (export "memory") 1)
                (table (export "__indirect_function_table") 1 externref)
            )
        "#,
        );
        assert!(matches!(validate_module(&m), Err(SandboxError::Validation(_))));
    }

    #[test]
    fn test_reject_wasi_import() {
        let m = module(
            r#"
            (module
                (import "wasi_snapshot_preview1" "fd_write"
                    (func (param i32 i32 i32 i32) (result i32)))
                (memory (export "memory") 1)
            )
        "#,
        );
        let err = validate_module(&m).unwrap_err();
        assert!(err.to_string().contains("WASI"));
    }

    #[test]
    fn test_accept_host_imports() {
        let m = module(
            r#"
            (module
                (import "rampart_host" "malloc" (func (param i32) (result i32)))
                (import "rampart_host" "free" (func (param i32)))
                (memory (export "memory") 1)
            )
        "#,
        );
        validate_module(&m).unwrap();
    }

    #[test]
    fn test_reject_unknown_or_mistyped_imports() {
        let unknown_module = module(
            r#"
            (module
                (import "env" "some_func" (func (result i32)))
                (memory (export "memory") 1)
            )
        "#,
        );
        assert!(matches!(validate_module(&unknown_module), Err(SandboxError::Validation(_))));

        let unknown_name = module(
            r#"
            (module
                (import "rampart_host" "exit" (func (param i32)))
                (memory (export "memory") 1)
            )
        "#,
        );
        assert!(matches!(validate_module(&unknown_name), Err(SandboxError::Validation(_))));

        let wrong_sig = module(
            r#"
            (module
                (import "rampart_host" "malloc" (func (param i64) (result i64)))
                (memory (export "memory") 1)
            )
        "#,
        );
        assert!(matches!(validate_module(&wrong_sig), Err(SandboxError::Validation(_))));
    }
}
