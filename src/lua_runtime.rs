//! Lua 5.4 VMs for classifier scripts.
//!
//! [`classifier_vm`] builds a fresh VM per call with the unsafe standard
//! libraries removed, a wall-clock budget enforced through an instruction
//! hook, and a few pure host tables. None of them performs I/O: a
//! classifier only ever sees the unit source it is handed.
//!
//! | Table | Functions |
//! |-------|-----------|
//! | `json` | `parse(str)`, `encode(value)` |
//! | `log` | `debug`, `info`, `warn`, `error` (forwarded to `tracing`) |
//! | `text` | `words(name)`, `contains_any(source, needles)`, `count(source, needle)` |

use mlua::prelude::*;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Globals a classifier must never reach.
const BLOCKED_GLOBALS: &[&str] = &[
    "os",
    "io",
    "debug",
    "package",
    "require",
    "dofile",
    "loadfile",
    "load",
    "collectgarbage",
];

/// A sandboxed VM whose logs carry `script_name` and whose execution stops
/// after `budget`.
pub(crate) fn classifier_vm(script_name: &str, budget: Duration) -> LuaResult<Lua> {
    let lua = Lua::new();
    install_deadline(&lua, budget);
    for name in BLOCKED_GLOBALS {
        lua.globals().set(*name, LuaValue::Nil)?;
    }
    install_json(&lua)?;
    install_log(&lua, script_name)?;
    install_text(&lua)?;
    Ok(lua)
}

/// Abort the running chunk with a runtime error once `budget` has elapsed.
pub(crate) fn install_deadline(lua: &Lua, budget: Duration) {
    let deadline = Instant::now() + budget;
    lua.set_hook(
        mlua::HookTriggers::new().every_nth_instruction(10_000),
        move |_lua, _debug| {
            if Instant::now() > deadline {
                Err(mlua::Error::RuntimeError(format!(
                    "script timed out after {} ms",
                    budget.as_millis()
                )))
            } else {
                Ok(mlua::VmState::Continue)
            }
        },
    );
}

fn install_json(lua: &Lua) -> LuaResult<()> {
    let json = lua.create_table()?;
    json.set(
        "parse",
        lua.create_function(|lua, text: String| {
            let value: Value = serde_json::from_str(&text)
                .map_err(|e| LuaError::RuntimeError(format!("json.parse: {}", e)))?;
            to_lua(lua, &value)
        })?,
    )?;
    json.set(
        "encode",
        lua.create_function(|_lua, value: LuaValue| {
            serde_json::to_string(&to_json(value)?)
                .map_err(|e| LuaError::RuntimeError(format!("json.encode: {}", e)))
        })?,
    )?;
    lua.globals().set("json", json)
}

fn install_log(lua: &Lua, script_name: &str) -> LuaResult<()> {
    let log = lua.create_table()?;
    for level in ["debug", "info", "warn", "error"] {
        let script = script_name.to_string();
        let emit = lua.create_function(move |_lua, msg: String| {
            match level {
                "debug" => tracing::debug!(script = %script, "{}", msg),
                "info" => tracing::info!(script = %script, "{}", msg),
                "warn" => tracing::warn!(script = %script, "{}", msg),
                _ => tracing::error!(script = %script, "{}", msg),
            }
            Ok(())
        })?;
        log.set(level, emit)?;
    }
    lua.globals().set("log", log)
}

fn install_text(lua: &Lua) -> LuaResult<()> {
    let text = lua.create_table()?;
    text.set(
        "words",
        lua.create_function(|lua, name: String| lua.create_sequence_from(split_words(&name)))?,
    )?;
    text.set(
        "contains_any",
        lua.create_function(|_lua, (source, needles): (String, Vec<String>)| {
            Ok(needles.iter().any(|n| source.contains(n.as_str())))
        })?,
    )?;
    text.set(
        "count",
        lua.create_function(|_lua, (source, needle): (String, String)| {
            if needle.is_empty() {
                return Ok(0);
            }
            Ok(source.matches(needle.as_str()).count() as i64)
        })?,
    )?;
    lua.globals().set("text", text)
}

/// Lowercase words of an identifier: `WeatherCard` and `weather_card`
/// both give `["weather", "card"]`.
pub(crate) fn split_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

pub(crate) fn to_lua(lua: &Lua, value: &Value) -> LuaResult<LuaValue> {
    Ok(match value {
        Value::Null => LuaValue::Nil,
        Value::Bool(b) => LuaValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => LuaValue::Integer(i),
            None => LuaValue::Number(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => LuaValue::String(lua.create_string(s)?),
        Value::Array(items) => {
            let converted = items
                .iter()
                .map(|v| to_lua(lua, v))
                .collect::<LuaResult<Vec<_>>>()?;
            LuaValue::Table(lua.create_sequence_from(converted)?)
        }
        Value::Object(map) => {
            let table = lua.create_table_with_capacity(0, map.len())?;
            for (k, v) in map {
                table.raw_set(k.as_str(), to_lua(lua, v)?)?;
            }
            LuaValue::Table(table)
        }
    })
}

/// Functions, userdata and threads become `null`.
pub(crate) fn to_json(value: LuaValue) -> LuaResult<Value> {
    Ok(match value {
        LuaValue::Nil => Value::Null,
        LuaValue::Boolean(b) => Value::Bool(b),
        LuaValue::Integer(i) => Value::from(i),
        LuaValue::Number(n) => serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        LuaValue::String(s) => Value::String(s.to_str()?.to_string()),
        LuaValue::Table(t) => table_to_json(&t)?,
        _ => Value::Null,
    })
}

/// A table keyed exactly by `1..=n` is an array; anything else, including
/// an empty table, is an object with stringified keys.
fn table_to_json(table: &LuaTable) -> LuaResult<Value> {
    let mut entries = Vec::new();
    for pair in table.pairs::<LuaValue, LuaValue>() {
        entries.push(pair?);
    }

    let len = entries.len();
    let is_sequence = len > 0
        && entries
            .iter()
            .all(|(k, _)| matches!(k, LuaValue::Integer(i) if *i >= 1 && (*i as usize) <= len));

    if is_sequence {
        let mut items = vec![Value::Null; len];
        for (k, v) in entries {
            if let LuaValue::Integer(i) = k {
                items[i as usize - 1] = to_json(v)?;
            }
        }
        return Ok(Value::Array(items));
    }

    let mut map = serde_json::Map::new();
    for (k, v) in entries {
        let key = match k {
            LuaValue::String(s) => s.to_str()?.to_string(),
            LuaValue::Integer(i) => i.to_string(),
            LuaValue::Number(n) => n.to_string(),
            _ => continue,
        };
        map.insert(key, to_json(v)?);
    }
    Ok(Value::Object(map))
}
