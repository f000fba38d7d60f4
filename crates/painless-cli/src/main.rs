use std::{process::ExitCode, sync::Arc};

use painless::{Runner, Settings, Value, compile, default_registry, param_map};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let Some(path) = args.get(1) else {
        eprintln!("usage: painless <script> [params.json] [score]");
        return ExitCode::FAILURE;
    };

    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Error reading {path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let params = match args.get(2) {
        Some(params_path) => match read_params(params_path) {
            Ok(params) => params,
            Err(err) => {
                eprintln!("Error reading params from {params_path}: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => param_map([]),
    };
    let score = args.get(3).and_then(|raw| raw.parse::<f64>().ok());

    let registry = match default_registry() {
        Ok(registry) => Arc::new(registry),
        Err(err) => {
            eprintln!("Registry error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let exe = match compile(&registry, path, &source, &Settings::default()) {
        Ok(exe) => exe,
        Err(err) => {
            eprintln!("{}", err.render(&source));
            return ExitCode::FAILURE;
        }
    };

    let runner = Runner::new(Arc::clone(&registry));
    match runner.execute(&exe, params, score) {
        Ok(result) => {
            println!("{}", result.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{}", err.describe(&registry));
            ExitCode::FAILURE
        }
    }
}

/// Loads a JSON object as the parameter bag.
fn read_params(path: &str) -> Result<painless::Params, String> {
    let text = std::fs::read_to_string(path).map_err(|err| err.to_string())?;
    let json: serde_json::Value = serde_json::from_str(&text).map_err(|err| err.to_string())?;
    let serde_json::Value::Object(object) = json else {
        return Err("params file must contain a JSON object".to_string());
    };
    let mut pairs = Vec::with_capacity(object.len());
    for (key, value) in object {
        pairs.push((key, json_to_value(value)?));
    }
    Ok(param_map(pairs.iter().map(|(k, v)| (k.as_str(), v.clone()))))
}

fn json_to_value(json: serde_json::Value) -> Result<Value, String> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                match i32::try_from(int) {
                    Ok(int) => Value::Int(int),
                    Err(_) => Value::Long(int),
                }
            } else {
                Value::Double(number.as_f64().ok_or("unsupported number")?)
            }
        }
        serde_json::Value::String(s) => Value::str(s),
        serde_json::Value::Array(items) => {
            let converted = items.into_iter().map(json_to_value).collect::<Result<Vec<_>, _>>()?;
            Value::list(converted)
        }
        serde_json::Value::Object(_) => return Err("nested objects are not supported as params".to_string()),
    })
}
