//! Starlark as the filter-program engine.
use crate::error::CompilationError;
use crate::pipeline::engine::{CompiledProgram, ExpressionEngine, ProgramResults};
use crate::pipeline::filter::HIGHLIGHT_KEY;
use crate::pipeline::global_functions::{reset_flags, HIGHLIGHT_FLAG, SKIP_FLAG};
use starlark::environment::{FrozenModule, Globals, GlobalsBuilder, Module};
use starlark::eval::{Evaluator, ReturnFileLoader};
use starlark::syntax::{AstModule, Dialect};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

fn dialect() -> Dialect {
    Dialect {
        enable_f_strings: true,
        ..Dialect::Extended
    }
}

/// A parsed program. Evaluation consumes an AST, so the source is kept to
/// re-parse per record.
pub struct ParsedProgram {
    source: String,
    ast: AstModule,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StarlarkEngine;

impl ExpressionEngine for StarlarkEngine {
    type Program = ParsedProgram;
    type Builtins = fn(&mut GlobalsBuilder);

    fn parse(&self, text: &str) -> Result<ParsedProgram, CompilationError> {
        let ast = AstModule::parse("program", text.to_string(), &dialect())?;
        Ok(ParsedProgram {
            source: text.to_string(),
            ast,
        })
    }

    fn compile(
        &self,
        program: ParsedProgram,
        variables: &[&str],
        builtins: fn(&mut GlobalsBuilder),
        search_path: &[PathBuf],
    ) -> Result<Box<dyn CompiledProgram>, CompilationError> {
        let globals = GlobalsBuilder::standard().with(builtins).build();

        let mut modules = HashMap::new();
        for load in program.ast.loads() {
            let id = load.module_id.to_string();
            if modules.contains_key(&id) {
                continue;
            }
            let frozen = load_module(&id, search_path, &globals)?;
            modules.insert(id, frozen);
        }
        debug!(modules = modules.len(), "compiled starlark program");

        Ok(Box::new(StarlarkProgram {
            source: program.source,
            globals,
            variables: variables.iter().map(|v| v.to_string()).collect(),
            modules,
        }))
    }
}

/// Evaluate `id` from the first search-path directory that has it.
/// Loaded modules see the same builtins but cannot load further modules.
fn load_module(
    id: &str,
    search_path: &[PathBuf],
    globals: &Globals,
) -> Result<FrozenModule, CompilationError> {
    let module_error = |message: String| CompilationError::Module {
        path: id.to_string(),
        message,
    };
    let path = search_path
        .iter()
        .map(|dir| dir.join(id))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| module_error(format!("not found in {:?}", search_path)))?;
    let source = std::fs::read_to_string(&path).map_err(|e| module_error(e.to_string()))?;
    let ast = AstModule::parse(id, source, &dialect()).map_err(|e| module_error(e.to_string()))?;

    let module = Module::new();
    {
        let mut eval = Evaluator::new(&module);
        eval.eval_module(ast, globals)
            .map_err(|e| module_error(e.to_string()))?;
    }
    module
        .freeze()
        .map_err(|e| module_error(anyhow::Error::from(e).to_string()))
}

pub struct StarlarkProgram {
    source: String,
    globals: Globals,
    variables: Vec<String>,
    modules: HashMap<String, FrozenModule>,
}

impl StarlarkProgram {
    /// Run once against a fresh module. The final expression is the result;
    /// a script ending in a statement yields whatever `data` holds. A list
    /// result is a stream of outputs.
    fn evaluate(
        &self,
        input: serde_json::Value,
        variables: &[serde_json::Value],
    ) -> anyhow::Result<Vec<serde_json::Value>> {
        reset_flags();

        let module = Module::new();
        let heap = module.heap();
        module.set("data", json_to_starlark_value(heap, input)?);
        for (name, value) in self.variables.iter().zip(variables) {
            module.set(name, json_to_starlark_value(heap, value.clone())?);
        }

        let ast = AstModule::parse("program", self.source.clone(), &dialect())
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        let modules: HashMap<&str, &FrozenModule> =
            self.modules.iter().map(|(k, v)| (k.as_str(), v)).collect();
        let loader = ReturnFileLoader { modules: &modules };

        let mut eval = Evaluator::new(&module);
        if !modules.is_empty() {
            eval.set_loader(&loader);
        }
        let result = eval
            .eval_module(ast, &self.globals)
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        if SKIP_FLAG.with(|flag| flag.get()) {
            return Ok(Vec::new());
        }

        let value = if result.is_none() {
            module
                .get("data")
                .unwrap_or_else(starlark::values::Value::new_none)
        } else {
            result
        };

        let mut outputs = match starlark::values::list::ListRef::from_value(value) {
            Some(list) => list
                .iter()
                .map(starlark_to_json_value)
                .collect::<anyhow::Result<Vec<_>>>()?,
            None => vec![starlark_to_json_value(value)?],
        };

        if let Some(on) = HIGHLIGHT_FLAG.with(|flag| flag.get()) {
            for output in &mut outputs {
                if let serde_json::Value::Object(obj) = output {
                    obj.insert(HIGHLIGHT_KEY.to_string(), serde_json::Value::Bool(on));
                }
            }
        }
        Ok(outputs)
    }
}

impl CompiledProgram for StarlarkProgram {
    fn run(
        &self,
        input: serde_json::Value,
        variables: &[serde_json::Value],
    ) -> ProgramResults<'_> {
        match self.evaluate(input, variables) {
            Ok(outputs) => Box::new(outputs.into_iter().map(Ok)),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }
}

fn json_to_starlark_value(
    heap: &starlark::values::Heap,
    json: serde_json::Value,
) -> anyhow::Result<starlark::values::Value<'_>> {
    use starlark::values::Value;

    match json {
        serde_json::Value::Null => Ok(Value::new_none()),
        serde_json::Value::Bool(b) => Ok(Value::new_bool(b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(heap.alloc(i))
            } else if let Some(f) = n.as_f64() {
                Ok(heap.alloc(f))
            } else {
                Ok(heap.alloc(n.to_string()))
            }
        }
        serde_json::Value::String(s) => Ok(heap.alloc(s)),
        serde_json::Value::Array(arr) => {
            let values: Result<Vec<Value>, anyhow::Error> = arr
                .into_iter()
                .map(|v| json_to_starlark_value(heap, v))
                .collect();
            Ok(heap.alloc(values?))
        }
        serde_json::Value::Object(obj) => {
            use starlark::collections::SmallMap;
            use starlark::values::dict::Dict;

            let mut content = SmallMap::new();
            for (k, v) in obj {
                let key = heap.alloc(k);
                let value = json_to_starlark_value(heap, v)?;
                content.insert_hashed(
                    key.get_hashed().map_err(|e| anyhow::anyhow!("{}", e))?,
                    value,
                );
            }
            Ok(heap.alloc(Dict::new(content)))
        }
    }
}

fn starlark_to_json_value(value: starlark::values::Value) -> anyhow::Result<serde_json::Value> {
    use starlark::values::{dict::DictRef, list::ListRef, tuple::TupleRef};

    if value.is_none() {
        Ok(serde_json::Value::Null)
    } else if let Some(b) = value.unpack_bool() {
        Ok(serde_json::Value::Bool(b))
    } else if let Some(i) = value.unpack_i32() {
        Ok(serde_json::Value::Number(serde_json::Number::from(i)))
    } else if let Some(s) = value.unpack_str() {
        Ok(serde_json::Value::String(s.to_string()))
    } else if let Some(list) = ListRef::from_value(value) {
        let arr: Result<Vec<serde_json::Value>, _> =
            list.iter().map(starlark_to_json_value).collect();
        Ok(serde_json::Value::Array(arr?))
    } else if let Some(tuple) = TupleRef::from_value(value) {
        let arr: Result<Vec<serde_json::Value>, _> =
            tuple.iter().map(starlark_to_json_value).collect();
        Ok(serde_json::Value::Array(arr?))
    } else if let Some(dict) = DictRef::from_value(value) {
        let mut obj = serde_json::Map::new();
        for (k, v) in dict.iter() {
            let key = match k.unpack_str() {
                Some(s) => s.to_string(),
                None => k.to_string(),
            };
            obj.insert(key, starlark_to_json_value(v)?);
        }
        Ok(serde_json::Value::Object(obj))
    } else {
        // Big ints and floats only expose their repr.
        let repr = value.to_str();
        let number = match value.get_type() {
            "int" => repr
                .parse::<i64>()
                .map(serde_json::Number::from)
                .ok()
                .or_else(|| repr.parse::<f64>().ok().and_then(serde_json::Number::from_f64)),
            "float" => repr.parse::<f64>().ok().and_then(serde_json::Number::from_f64),
            _ => None,
        };
        Ok(number.map_or(serde_json::Value::String(repr), serde_json::Value::Number))
    }
}
