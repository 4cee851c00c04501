//! Reflect a compiled wasm module into a [`ModuleDescriptor`].
//!
//! Exported functions named `Type.method` are grouped into types; exports
//! without a dot belong to a type named after the module. Parameter names
//! come from the `name` custom section's local names when present.

use crate::structural::{MethodDescriptor, ModuleDescriptor, Scalar, TypeDescriptor, TypeSlot};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use wasmparser::{ExternalKind, KnownCustom, Name, Parser, Payload};
use wasmtime::{ExternType, Module, ValType};

#[derive(Debug, Default)]
struct NameSection {
    /// Export name to function index.
    exports: HashMap<String, u32>,
    /// Function index to local index to name.
    locals: HashMap<u32, BTreeMap<u32, String>>,
}

impl NameSection {
    fn param_name(&self, export: &str, param: u32) -> Option<&str> {
        let func = self.exports.get(export)?;
        self.locals.get(func)?.get(&param).map(String::as_str)
    }
}

fn read_names(bytes: &[u8]) -> Result<NameSection> {
    let mut names = NameSection::default();
    for payload in Parser::new(0).parse_all(bytes) {
        match payload.context("malformed wasm binary")? {
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.context("malformed export section")?;
                    if matches!(export.kind, ExternalKind::Func) {
                        names.exports.insert(export.name.to_string(), export.index);
                    }
                }
            }
            Payload::CustomSection(section) => {
                if let KnownCustom::Name(reader) = section.as_known() {
                    // A broken name section only costs us parameter names.
                    for subsection in reader.into_iter().flatten() {
                        let Name::Local(functions) = subsection else {
                            continue;
                        };
                        for function in functions.into_iter().flatten() {
                            let locals = names.locals.entry(function.index).or_default();
                            for local in function.names.into_iter().flatten() {
                                locals.insert(local.index, local.name.to_string());
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(names)
}

fn scalar(ty: &ValType) -> Option<Scalar> {
    match ty {
        ValType::I32 => Some(Scalar::I32),
        ValType::I64 => Some(Scalar::I64),
        ValType::F32 => Some(Scalar::F32),
        ValType::F64 => Some(Scalar::F64),
        _ => None,
    }
}

/// Split `Type.method`; undotted exports land on the module-level type.
pub fn split_export<'a>(export: &'a str, module_name: &'a str) -> (&'a str, &'a str) {
    match export.rsplit_once('.') {
        Some((ty, method)) if !ty.is_empty() && !method.is_empty() => (ty, method),
        _ => (module_name, export),
    }
}

/// Build the descriptor for `module`, compiled from `bytes`.
pub fn describe_module(name: &str, bytes: &[u8], module: &Module) -> Result<ModuleDescriptor> {
    let names = read_names(bytes)?;
    let mut order: Vec<String> = Vec::new();
    let mut slots: HashMap<String, std::result::Result<Vec<MethodDescriptor>, String>> =
        HashMap::new();

    for export in module.exports() {
        let ExternType::Func(func) = export.ty() else {
            continue;
        };
        let (type_name, method_name) = split_export(export.name(), name);
        let slot = slots.entry(type_name.to_string()).or_insert_with(|| {
            order.push(type_name.to_string());
            Ok(Vec::new())
        });
        let Ok(methods) = slot else {
            continue;
        };

        if let Some(bad) = func.params().chain(func.results()).find(|ty| scalar(ty).is_none()) {
            *slot = Err(format!("method `{method_name}` uses unsupported type {bad:?}"));
            continue;
        }
        let param_types = func.params().filter_map(|ty| scalar(&ty)).collect();
        let results = func.results().filter_map(|ty| scalar(&ty)).collect();

        let params = (0..func.params().len())
            .map(|idx| {
                let idx = idx as u32;
                names
                    .param_name(export.name(), idx)
                    .map_or_else(|| format!("arg{idx}"), str::to_string)
            })
            .collect();
        methods.push(MethodDescriptor {
            name: method_name.to_string(),
            export: export.name().to_string(),
            params,
            param_types,
            results,
        });
    }

    let types = order
        .into_iter()
        .filter_map(|type_name| {
            let slot = slots.remove(&type_name)?;
            Some(match slot {
                Ok(methods) => TypeSlot::Loaded(TypeDescriptor {
                    name: type_name,
                    methods,
                }),
                Err(reason) => TypeSlot::Failed {
                    name: type_name,
                    reason,
                },
            })
        })
        .collect();

    Ok(ModuleDescriptor {
        name: name.to_string(),
        types,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::Engine;

    fn describe(wat: &str) -> ModuleDescriptor {
        let bytes = wat::parse_str(wat).unwrap();
        let engine = Engine::default();
        let module = Module::new(&engine, &bytes).unwrap();
        describe_module("tools", &bytes, &module).unwrap()
    }

    #[test]
    fn split_export_names() {
        assert_eq!(split_export("Renumber.execute", "m"), ("Renumber", "execute"));
        assert_eq!(split_export("a.b.run", "m"), ("a.b", "run"));
        assert_eq!(split_export("main", "m"), ("m", "main"));
        assert_eq!(split_export(".x", "m"), ("m", ".x"));
        assert_eq!(split_export("x.", "m"), ("m", "x."));
    }

    #[test]
    fn groups_exports_by_type() {
        let descriptor = describe(
            r#"(module
                (func (export "Renumber.new") (result i32) i32.const 1)
                (func (export "Renumber.execute") (param $self i32) (result i32) i32.const 0)
                (func (export "Hooks.opened") (param $sender i32) (param $e i32))
                (func (export "helper") (param i64))
                (memory (export "memory") 1))"#,
        );

        let names: Vec<&str> = descriptor.types.iter().map(TypeSlot::name).collect();
        assert_eq!(names, vec!["Renumber", "Hooks", "tools"]);

        let renumber = descriptor.loaded_types().next().unwrap();
        assert!(renumber.constructor().is_some());
        assert_eq!(renumber.entry().unwrap().params, vec!["self"]);

        let hooks = descriptor.loaded_types().nth(1).unwrap();
        assert!(hooks.methods[0].is_event_handler());
        assert_eq!(hooks.methods[0].export, "Hooks.opened");
    }

    #[test]
    fn unnamed_params_get_positional_names() {
        let descriptor = describe(r#"(module (func (export "T.f") (param i32 f64)))"#);
        let ty = descriptor.loaded_types().next().unwrap();
        assert_eq!(ty.methods[0].params, vec!["arg0", "arg1"]);
        assert_eq!(ty.methods[0].param_types, vec![Scalar::I32, Scalar::F64]);
        assert!(ty.methods[0].results.is_empty());
    }

    #[test]
    fn vector_types_fail_the_whole_type() {
        let descriptor = describe(
            r#"(module
                (func (export "Simd.execute") (param $self i32) (result i32) i32.const 0)
                (func (export "Simd.splat") (param v128))
                (func (export "Plain.execute") (param $self i32) (result i32) i32.const 0))"#,
        );
        let failed: Vec<(&str, &str)> = descriptor.failed_types().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "Simd");
        assert!(failed[0].1.contains("splat"));
        assert_eq!(descriptor.loaded_types().count(), 1);
    }
}
