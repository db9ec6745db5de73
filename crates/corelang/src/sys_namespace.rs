//! Builds the single `sys` namespace injected into every top-level script: the string/bytes/
//! buffer value classes, a handful of representative collection and I/O classes, and the
//! top-level statics (`current_time_millis`, `args`, `out`, ...).
//!
//! Registration here follows the same pattern throughout: one [`SysClassBuilder`] per class,
//! closures that downcast a `SysObject`'s opaque state to the concrete Rust type only this
//! module knows about, folded into one [`SysNamespaceBuilder`] at the end.

use std::{
    any::Any,
    cell::OnceCell,
    fs,
    io::{Read as _, Write as _},
    net::{TcpListener, TcpStream},
    path::PathBuf,
    rc::Rc,
};

use crate::{
    host::{NativeFn, SysClassBuilder, SysClassDescriptor, SysNamespaceBuilder, SysNamespaceDescriptor},
    intern::NameRegistry,
    value::{RuntimeError, Value, ValueResult},
};

fn wrong_args() -> RuntimeError {
    RuntimeError::new("Wrong method arguments")
}

fn arg_string(args: &[Value], i: usize) -> ValueResult<String> {
    args.get(i).ok_or_else(wrong_args)?.get_string().map(|s| s.as_str().to_owned())
}

fn arg_integer(args: &[Value], i: usize) -> ValueResult<i64> {
    args.get(i).ok_or_else(wrong_args)?.get_integer()
}

fn arg_boolean(args: &[Value], i: usize) -> ValueResult<bool> {
    args.get(i).ok_or_else(wrong_args)?.get_boolean()
}

fn this_string(this: Option<&Value>) -> ValueResult<Rc<crate::value::StringValue>> {
    this.ok_or_else(wrong_args)?.get_string()
}

/// Downcasts a bound `this` sys-object's state for the duration of the closure. Mismatched
/// state type is a host bridge registration bug, not a script error, hence the panic.
fn with_state<T: 'static, R>(this: Option<&Value>, f: impl FnOnce(&T) -> ValueResult<R>) -> ValueResult<R> {
    let Some(Value::SysObject(obj)) = this else { return Err(wrong_args()) };
    let borrowed = obj.state().borrow();
    let value = borrowed.downcast_ref::<T>().expect("host bridge: state type mismatch");
    f(value)
}

fn with_state_mut<T: 'static, R>(this: Option<&Value>, f: impl FnOnce(&mut T) -> ValueResult<R>) -> ValueResult<R> {
    let Some(Value::SysObject(obj)) = this else { return Err(wrong_args()) };
    let mut borrowed = obj.state().borrow_mut();
    let value = borrowed.downcast_mut::<T>().expect("host bridge: state type mismatch");
    f(value)
}

fn bounds_range(start: i64, end: i64, len: usize) -> ValueResult<(usize, usize)> {
    if start < 0 || end < start || (end as usize) > len {
        return Err(RuntimeError::new("Index out of bounds"));
    }
    Ok((start as usize, end as usize))
}

// ---------------------------------------------------------------------------------------
// String
// ---------------------------------------------------------------------------------------

fn build_string_class(registry: &NameRegistry, bytes_class: &Rc<SysClassDescriptor>) -> Rc<SysClassDescriptor> {
    let bytes_class = Rc::clone(bytes_class);
    SysClassBuilder::new(registry, "String")
        .instance_method("is_empty", 0, Rc::new(|_t, this, _args| {
            Ok(Value::Boolean(this_string(this)?.as_str().is_empty()))
        }))
        .instance_method("length", 0, Rc::new(|_t, this, _args| {
            Ok(Value::Integer(this_string(this)?.as_str().len() as i64))
        }))
        .instance_method("char_at", 1, Rc::new(|_t, this, args| {
            let s = this_string(this)?;
            let bytes = s.as_str().as_bytes();
            let idx = arg_integer(args, 0)?;
            if idx < 0 || idx as usize >= bytes.len() {
                return Err(RuntimeError::new("Index out of bounds"));
            }
            Ok(Value::Integer(i64::from(bytes[idx as usize])))
        }))
        .instance_method("index_of", 1, Rc::new(|_t, this, args| index_of(this, args, 0)))
        .instance_method("index_of", 2, Rc::new(|_t, this, args| {
            let from = arg_integer(args, 1)?;
            index_of(this, args, from)
        }))
        .instance_method("substring", 1, Rc::new(|_t, this, args| {
            let s = this_string(this)?;
            let len = s.as_str().len() as i64;
            let start = arg_integer(args, 0)?;
            if start < 0 || start > len {
                return Err(RuntimeError::new("Index out of bounds"));
            }
            Ok(Value::new_string(s.as_str()[start as usize..].to_owned()))
        }))
        .instance_method("substring", 2, Rc::new(|_t, this, args| {
            let s = this_string(this)?;
            let len = s.as_str().len() as i64;
            let start = arg_integer(args, 0)?;
            let end = arg_integer(args, 1)?;
            if start < 0 || end < start || end > len {
                return Err(RuntimeError::new("Index out of bounds"));
            }
            Ok(Value::new_string(s.as_str()[start as usize..end as usize].to_owned()))
        }))
        .instance_method("get_bytes", 0, {
            let bytes_class = Rc::clone(&bytes_class);
            let get_bytes: NativeFn = Rc::new(move |_t, this, _args| {
                let s = this_string(this)?;
                Ok(bytes_class.wrap_state(Box::new(s.as_str().as_bytes().to_vec())))
            });
            get_bytes
        })
        .instance_method("get_lines", 0, Rc::new(|_t, this, _args| {
            let s = this_string(this)?;
            let mut lines = Vec::new();
            let mut start = 0usize;
            let bytes = s.as_str().as_bytes();
            let mut i = 0usize;
            while i < bytes.len() {
                match bytes[i] {
                    b'\r' => {
                        lines.push(Value::new_string(s.as_str()[start..i].to_owned()));
                        i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                        start = i;
                    }
                    b'\n' => {
                        lines.push(Value::new_string(s.as_str()[start..i].to_owned()));
                        i += 1;
                        start = i;
                    }
                    _ => i += 1,
                }
            }
            lines.push(Value::new_string(s.as_str()[start..].to_owned()));
            Ok(Value::new_array(lines))
        }))
        .instance_method("equals", 1, Rc::new(|_t, this, args| {
            let s = this_string(this)?;
            Ok(Value::Boolean(match args.first() {
                Some(Value::String(other)) => s.as_str() == other.as_str(),
                _ => false,
            }))
        }))
        .instance_method("compare_to", 1, Rc::new(|_t, this, args| {
            let s = this_string(this)?;
            let Some(other) = args.first() else { return Err(wrong_args()) };
            if other.is_null() {
                return Err(RuntimeError::new("Null pointer error"));
            }
            let other = other.get_string()?;
            Ok(Value::Integer(match s.as_str().as_bytes().cmp(other.as_str().as_bytes()) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            }))
        }))
        .static_method("char", 1, Rc::new(|_t, _this, args| {
            let code = arg_integer(args, 0)?;
            if !(0..=255).contains(&code) {
                return Err(RuntimeError::new("Value out of bounds"));
            }
            Ok(Value::new_string(char::from(code as u8).to_string()))
        }))
        .build()
}

fn index_of(this: Option<&Value>, args: &[Value], from: i64) -> ValueResult<Value> {
    let s = this_string(this)?;
    let bytes = s.as_str().as_bytes();
    let code = arg_integer(args, 0)?;
    if !(0..=255).contains(&code) || from < 0 {
        return Ok(Value::Integer(-1));
    }
    let needle = code as u8;
    let start = from as usize;
    if start >= bytes.len() {
        return Ok(Value::Integer(-1));
    }
    match bytes[start..].iter().position(|&b| b == needle) {
        Some(pos) => Ok(Value::Integer((start + pos) as i64)),
        None => Ok(Value::Integer(-1)),
    }
}

// ---------------------------------------------------------------------------------------
// Bytes (backed by a plain Vec<u8>; the language has no dedicated byte-array `Value`
// variant, so this lives entirely as host-object state).
// ---------------------------------------------------------------------------------------

fn build_bytes_class(registry: &NameRegistry) -> Rc<SysClassDescriptor> {
    SysClassBuilder::new(registry, "Bytes")
        .constructor(1, Rc::new(|_t, args| {
            let len = arg_integer(args, 0)?;
            if len < 0 {
                return Err(RuntimeError::new("Value out of bounds"));
            }
            Ok(Box::new(vec![0u8; len as usize]) as Box<dyn Any>)
        }))
        .instance_method("length", 0, Rc::new(|_t, this, _args| {
            with_state::<Vec<u8>, _>(this, |v| Ok(Value::Integer(v.len() as i64)))
        }))
        .instance_method("to_string", 0, Rc::new(|_t, this, _args| {
            with_state::<Vec<u8>, _>(this, |v| {
                Ok(Value::new_string(String::from_utf8_lossy(v).into_owned()))
            })
        }))
        .instance_method("to_string", 2, Rc::new(|_t, this, args| {
            let start = arg_integer(args, 0)?;
            let end = arg_integer(args, 1)?;
            with_state::<Vec<u8>, _>(this, |v| {
                let (s, e) = bounds_range(start, end, v.len())?;
                Ok(Value::new_string(String::from_utf8_lossy(&v[s..e]).into_owned()))
            })
        }))
        .instance_method("get_array_element", 1, Rc::new(|_t, this, args| {
            let idx = arg_integer(args, 0)?;
            with_state::<Vec<u8>, _>(this, |v| {
                if idx < 0 || idx as usize >= v.len() {
                    return Err(RuntimeError::new("Index out of bounds"));
                }
                Ok(Value::Integer(i64::from(v[idx as usize])))
            })
        }))
        .instance_method("set_array_element", 2, Rc::new(|_t, this, args| {
            let idx = arg_integer(args, 0)?;
            let raw = arg_integer(args, 1)?;
            if !(0..=255).contains(&raw) {
                return Err(RuntimeError::new("Value out of bounds"));
            }
            with_state_mut::<Vec<u8>, _>(this, |v| {
                if idx < 0 || idx as usize >= v.len() {
                    return Err(RuntimeError::new("Index out of bounds"));
                }
                v[idx as usize] = raw as u8;
                Ok(Value::Void)
            })
        }))
        .build()
}

// ---------------------------------------------------------------------------------------
// StringBuffer
// ---------------------------------------------------------------------------------------

fn build_string_buffer_class(registry: &NameRegistry) -> Rc<SysClassDescriptor> {
    SysClassBuilder::new(registry, "StringBuffer")
        .constructor(0, Rc::new(|_t, _args| Ok(Box::new(String::new()) as Box<dyn Any>)))
        .instance_method("is_empty", 0, Rc::new(|_t, this, _args| {
            with_state::<String, _>(this, |s| Ok(Value::Boolean(s.is_empty())))
        }))
        .instance_method("length", 0, Rc::new(|_t, this, _args| {
            with_state::<String, _>(this, |s| Ok(Value::Integer(s.len() as i64)))
        }))
        .instance_method("charAt", 1, Rc::new(|_t, this, args| {
            let idx = arg_integer(args, 0)?;
            with_state::<String, _>(this, |s| {
                let bytes = s.as_bytes();
                if idx < 0 || idx as usize >= bytes.len() {
                    return Err(RuntimeError::new("Index out of bounds"));
                }
                Ok(Value::Integer(i64::from(bytes[idx as usize])))
            })
        }))
        .instance_method("to_string", 0, Rc::new(|_t, this, _args| {
            with_state::<String, _>(this, |s| Ok(Value::new_string(s.clone())))
        }))
        .instance_method("append_char", 1, Rc::new(|_t, this, args| {
            let code = arg_integer(args, 0)?;
            if !(0..=255).contains(&code) {
                return Err(RuntimeError::new("Value out of bounds"));
            }
            with_state_mut::<String, _>(this, |s| {
                s.push(char::from(code as u8));
                Ok(Value::Void)
            })
        }))
        .instance_method("append", 1, Rc::new(|_t, this, args| {
            let text = args.first().ok_or_else(wrong_args)?.to_display_string()?;
            with_state_mut::<String, _>(this, |s| {
                s.push_str(&text);
                Ok(Value::Void)
            })
        }))
        .instance_method("clear", 0, Rc::new(|_t, this, _args| {
            with_state_mut::<String, _>(this, |s| {
                s.clear();
                Ok(Value::Void)
            })
        }))
        .build()
}

// ---------------------------------------------------------------------------------------
// ArrayList / HashSet / HashMap — representative registrations; a full collections
// library is explicitly out of scope, so each carries the operations its original
// signature lists and nothing beyond that.
// ---------------------------------------------------------------------------------------

fn build_array_list_class(registry: &NameRegistry) -> Rc<SysClassDescriptor> {
    SysClassBuilder::new(registry, "ArrayList")
        .constructor(0, Rc::new(|_t, _args| Ok(Box::new(Vec::<Value>::new()) as Box<dyn Any>)))
        .constructor(1, Rc::new(|_t, args| {
            let capacity = arg_integer(args, 0)?.max(0) as usize;
            Ok(Box::new(Vec::<Value>::with_capacity(capacity)) as Box<dyn Any>)
        }))
        .instance_method("is_empty", 0, Rc::new(|_t, this, _args| {
            with_state::<Vec<Value>, _>(this, |v| Ok(Value::Boolean(v.is_empty())))
        }))
        .instance_method("size", 0, Rc::new(|_t, this, _args| {
            with_state::<Vec<Value>, _>(this, |v| Ok(Value::Integer(v.len() as i64)))
        }))
        .instance_method("clear", 0, Rc::new(|_t, this, _args| {
            with_state_mut::<Vec<Value>, _>(this, |v| {
                v.clear();
                Ok(Value::Void)
            })
        }))
        .instance_method("contains", 1, Rc::new(|_t, this, args| {
            let needle = args.first().ok_or_else(wrong_args)?.clone();
            with_state::<Vec<Value>, _>(this, |v| {
                for item in v {
                    if item.value_equals(&needle)? {
                        return Ok(Value::Boolean(true));
                    }
                }
                Ok(Value::Boolean(false))
            })
        }))
        .instance_method("index_of", 1, Rc::new(|_t, this, args| {
            let needle = args.first().ok_or_else(wrong_args)?.clone();
            with_state::<Vec<Value>, _>(this, |v| {
                for (i, item) in v.iter().enumerate() {
                    if item.value_equals(&needle)? {
                        return Ok(Value::Integer(i as i64));
                    }
                }
                Ok(Value::Integer(-1))
            })
        }))
        .instance_method("get", 1, Rc::new(|_t, this, args| {
            let idx = arg_integer(args, 0)?;
            with_state::<Vec<Value>, _>(this, |v| {
                if idx < 0 || idx as usize >= v.len() {
                    return Err(RuntimeError::new("Index out of bounds"));
                }
                Ok(v[idx as usize].clone())
            })
        }))
        .instance_method("add", 1, Rc::new(|_t, this, args| {
            let item = args.first().ok_or_else(wrong_args)?.clone();
            with_state_mut::<Vec<Value>, _>(this, |v| {
                v.push(item.clone());
                Ok(Value::Void)
            })
        }))
        .instance_method("remove", 1, Rc::new(|_t, this, args| {
            let idx = arg_integer(args, 0)?;
            with_state_mut::<Vec<Value>, _>(this, |v| {
                if idx < 0 || idx as usize >= v.len() {
                    return Err(RuntimeError::new("Index out of bounds"));
                }
                Ok(v.remove(idx as usize))
            })
        }))
        .instance_method("to_array", 0, Rc::new(|_t, this, _args| {
            with_state::<Vec<Value>, _>(this, |v| Ok(Value::new_array(v.clone())))
        }))
        .instance_method("sort", 0, Rc::new(|_t, this, _args| {
            with_state_mut::<Vec<Value>, _>(this, |v| {
                let mut err = None;
                v.sort_by(|a, b| match a.value_compare_to(b) {
                    Ok(ord) => ord,
                    Err(e) => {
                        err.get_or_insert(e);
                        std::cmp::Ordering::Equal
                    }
                });
                if let Some(e) = err {
                    return Err(e);
                }
                Ok(Value::Void)
            })
        }))
        .build()
}

fn build_hash_set_class(registry: &NameRegistry) -> Rc<SysClassDescriptor> {
    SysClassBuilder::new(registry, "HashSet")
        .constructor(0, Rc::new(|_t, _args| Ok(Box::new(Vec::<Value>::new()) as Box<dyn Any>)))
        .instance_method("is_empty", 0, Rc::new(|_t, this, _args| {
            with_state::<Vec<Value>, _>(this, |v| Ok(Value::Boolean(v.is_empty())))
        }))
        .instance_method("size", 0, Rc::new(|_t, this, _args| {
            with_state::<Vec<Value>, _>(this, |v| Ok(Value::Integer(v.len() as i64)))
        }))
        .instance_method("clear", 0, Rc::new(|_t, this, _args| {
            with_state_mut::<Vec<Value>, _>(this, |v| {
                v.clear();
                Ok(Value::Void)
            })
        }))
        .instance_method("contains", 1, Rc::new(|_t, this, args| {
            let needle = args.first().ok_or_else(wrong_args)?.clone();
            with_state::<Vec<Value>, _>(this, |v| {
                for item in v {
                    if item.value_equals(&needle)? {
                        return Ok(Value::Boolean(true));
                    }
                }
                Ok(Value::Boolean(false))
            })
        }))
        .instance_method("add", 1, Rc::new(|_t, this, args| {
            let item = args.first().ok_or_else(wrong_args)?.clone();
            with_state_mut::<Vec<Value>, _>(this, |v| {
                for existing in v.iter() {
                    if existing.value_equals(&item)? {
                        return Ok(Value::Boolean(false));
                    }
                }
                v.push(item.clone());
                Ok(Value::Boolean(true))
            })
        }))
        .instance_method("remove", 1, Rc::new(|_t, this, args| {
            let item = args.first().ok_or_else(wrong_args)?.clone();
            with_state_mut::<Vec<Value>, _>(this, |v| {
                for (i, existing) in v.iter().enumerate() {
                    if existing.value_equals(&item)? {
                        v.remove(i);
                        return Ok(Value::Boolean(true));
                    }
                }
                Ok(Value::Boolean(false))
            })
        }))
        .instance_method("to_array", 0, Rc::new(|_t, this, _args| {
            with_state::<Vec<Value>, _>(this, |v| Ok(Value::new_array(v.clone())))
        }))
        .build()
}

fn build_hash_map_class(registry: &NameRegistry) -> Rc<SysClassDescriptor> {
    SysClassBuilder::new(registry, "HashMap")
        .constructor(0, Rc::new(|_t, _args| Ok(Box::new(Vec::<(Value, Value)>::new()) as Box<dyn Any>)))
        .instance_method("is_empty", 0, Rc::new(|_t, this, _args| {
            with_state::<Vec<(Value, Value)>, _>(this, |v| Ok(Value::Boolean(v.is_empty())))
        }))
        .instance_method("size", 0, Rc::new(|_t, this, _args| {
            with_state::<Vec<(Value, Value)>, _>(this, |v| Ok(Value::Integer(v.len() as i64)))
        }))
        .instance_method("clear", 0, Rc::new(|_t, this, _args| {
            with_state_mut::<Vec<(Value, Value)>, _>(this, |v| {
                v.clear();
                Ok(Value::Void)
            })
        }))
        .instance_method("contains", 1, Rc::new(|_t, this, args| {
            let key = args.first().ok_or_else(wrong_args)?.clone();
            with_state::<Vec<(Value, Value)>, _>(this, |v| {
                for (k, _) in v {
                    if k.value_equals(&key)? {
                        return Ok(Value::Boolean(true));
                    }
                }
                Ok(Value::Boolean(false))
            })
        }))
        .instance_method("get", 1, Rc::new(|_t, this, args| {
            let key = args.first().ok_or_else(wrong_args)?.clone();
            with_state::<Vec<(Value, Value)>, _>(this, |v| {
                for (k, val) in v {
                    if k.value_equals(&key)? {
                        return Ok(val.clone());
                    }
                }
                Ok(Value::Null)
            })
        }))
        .instance_method("put", 2, Rc::new(|_t, this, args| {
            let key = args.first().ok_or_else(wrong_args)?.clone();
            let val = args.get(1).ok_or_else(wrong_args)?.clone();
            with_state_mut::<Vec<(Value, Value)>, _>(this, |v| {
                for entry in v.iter_mut() {
                    if entry.0.value_equals(&key)? {
                        let old = entry.1.clone();
                        entry.1 = val.clone();
                        return Ok(old);
                    }
                }
                v.push((key.clone(), val.clone()));
                Ok(Value::Null)
            })
        }))
        .instance_method("remove", 1, Rc::new(|_t, this, args| {
            let key = args.first().ok_or_else(wrong_args)?.clone();
            with_state_mut::<Vec<(Value, Value)>, _>(this, |v| {
                for (i, (k, _)) in v.iter().enumerate() {
                    if k.value_equals(&key)? {
                        return Ok(v.remove(i).1);
                    }
                }
                Ok(Value::Null)
            })
        }))
        .instance_method("keys", 0, Rc::new(|_t, this, _args| {
            with_state::<Vec<(Value, Value)>, _>(this, |v| {
                Ok(Value::new_array(v.iter().map(|(k, _)| k.clone()).collect()))
            })
        }))
        .instance_method("values", 0, Rc::new(|_t, this, _args| {
            with_state::<Vec<(Value, Value)>, _>(this, |v| {
                Ok(Value::new_array(v.iter().map(|(_, val)| val.clone()).collect()))
            })
        }))
        .build()
}

// ---------------------------------------------------------------------------------------
// BinaryInput / BinaryOutput — never constructed directly from script code, only handed
// back from `File.binary_in`/`File.binary_out`; the original doesn't register them as
// named sys classes either, just the `File` factory methods that produce them.
// ---------------------------------------------------------------------------------------

fn build_binary_input_class(registry: &NameRegistry, bytes_class: &Rc<SysClassDescriptor>) -> Rc<SysClassDescriptor> {
    let bytes_class = Rc::clone(bytes_class);
    SysClassBuilder::new(registry, "BinaryInput")
        .instance_method("read_byte", 0, Rc::new(|_t, this, _args| {
            with_state_mut::<fs::File, _>(this, |f| {
                let mut buf = [0u8; 1];
                match f.read(&mut buf) {
                    Ok(0) => Ok(Value::Integer(-1)),
                    Ok(_) => Ok(Value::Integer(i64::from(buf[0]))),
                    Err(e) => Err(io_error(e)),
                }
            })
        }))
        .instance_method("read", 1, {
            let bytes_class = Rc::clone(&bytes_class);
            let read_fn: NativeFn = Rc::new(move |_t, this, args| {
                let want = arg_integer(args, 0)?.max(0) as usize;
                with_state_mut::<fs::File, _>(this, |f| {
                    let mut buf = vec![0u8; want];
                    let n = f.read(&mut buf).map_err(io_error)?;
                    buf.truncate(n);
                    Ok(bytes_class.wrap_state(Box::new(buf)))
                })
            });
            read_fn
        })
        .instance_method("close", 0, Rc::new(|_t, _this, _args| Ok(Value::Void)))
        .build()
}

fn build_binary_output_class(registry: &NameRegistry) -> Rc<SysClassDescriptor> {
    SysClassBuilder::new(registry, "BinaryOutput")
        .instance_method("write_byte", 1, Rc::new(|_t, this, args| {
            let b = arg_integer(args, 0)?;
            if !(0..=255).contains(&b) {
                return Err(RuntimeError::new("Value out of bounds"));
            }
            with_state_mut::<fs::File, _>(this, |f| {
                f.write_all(&[b as u8]).map_err(io_error)?;
                Ok(Value::Void)
            })
        }))
        .instance_method("write", 1, Rc::new(|_t, this, args| {
            let Some(Value::SysObject(bytes)) = args.first() else { return Err(wrong_args()) };
            let data = bytes.state().borrow().downcast_ref::<Vec<u8>>().expect("host bridge: expected Bytes state").clone();
            with_state_mut::<fs::File, _>(this, |f| {
                f.write_all(&data).map_err(io_error)?;
                Ok(Value::Void)
            })
        }))
        .instance_method("close", 0, Rc::new(|_t, _this, _args| Ok(Value::Void)))
        .build()
}

// ---------------------------------------------------------------------------------------
// File — path/metadata/text inspection, directory listing, and stream factories.
// `list_files` wraps each entry back into this same class, so the builder closure needs
// `File`'s own `Rc<SysClassDescriptor>` before `build()` has produced one; a `OnceCell`
// filled in right after `build()` breaks that cycle the same way a class's own layout is
// filled in after the rest of it is already built.
// ---------------------------------------------------------------------------------------

fn file_state(this: Option<&Value>) -> ValueResult<PathBuf> {
    with_state::<PathBuf, _>(this, |p| Ok(p.clone()))
}

fn io_error(err: std::io::Error) -> RuntimeError {
    RuntimeError::new(format!("I/O error: {err}"))
}

fn open_text_out(path: &std::path::Path, append: bool) -> std::io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create(true).append(append).truncate(!append).open(path)
}

fn build_file_class(
    registry: &NameRegistry,
    bytes_class: &Rc<SysClassDescriptor>,
    text_output_class: &Rc<SysClassDescriptor>,
    binary_input_class: &Rc<SysClassDescriptor>,
    binary_output_class: &Rc<SysClassDescriptor>,
) -> Rc<SysClassDescriptor> {
    let bytes_class = Rc::clone(bytes_class);
    let text_output_class = Rc::clone(text_output_class);
    let binary_input_class = Rc::clone(binary_input_class);
    let binary_output_class = Rc::clone(binary_output_class);
    let self_class: Rc<OnceCell<Rc<SysClassDescriptor>>> = Rc::new(OnceCell::new());

    let descriptor = SysClassBuilder::new(registry, "File")
        .constructor(1, Rc::new(|_t, args| {
            Ok(Box::new(PathBuf::from(arg_string(args, 0)?)) as Box<dyn Any>)
        }))
        .constructor(2, Rc::new(|_t, args| {
            let parent = arg_string(args, 0)?;
            let name = arg_string(args, 1)?;
            Ok(Box::new(PathBuf::from(parent).join(name)) as Box<dyn Any>)
        }))
        .instance_method("get_name", 0, Rc::new(|_t, this, _args| {
            let path = file_state(this)?;
            Ok(Value::new_string(path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()))
        }))
        .instance_method("get_path", 0, Rc::new(|_t, this, _args| {
            Ok(Value::new_string(file_state(this)?.to_string_lossy().into_owned()))
        }))
        .instance_method("get_absolute_path", 0, Rc::new(|_t, this, _args| {
            let path = file_state(this)?;
            let abs = fs::canonicalize(&path).unwrap_or(path);
            Ok(Value::new_string(abs.to_string_lossy().into_owned()))
        }))
        .instance_method("exists", 0, Rc::new(|_t, this, _args| {
            Ok(Value::Boolean(file_state(this)?.exists()))
        }))
        .instance_method("is_file", 0, Rc::new(|_t, this, _args| {
            Ok(Value::Boolean(file_state(this)?.is_file()))
        }))
        .instance_method("is_directory", 0, Rc::new(|_t, this, _args| {
            Ok(Value::Boolean(file_state(this)?.is_dir()))
        }))
        .instance_method("get_size", 0, Rc::new(|_t, this, _args| {
            let len = fs::metadata(file_state(this)?).map(|m| m.len()).unwrap_or(0);
            Ok(Value::Integer(len as i64))
        }))
        .instance_method("list_files", 0, {
            let self_class = Rc::clone(&self_class);
            let list_files: NativeFn = Rc::new(move |_t, this, _args| {
                let path = file_state(this)?;
                let class = self_class.get().expect("host bridge: File class not yet finalized");
                let mut files = Vec::new();
                for entry in fs::read_dir(&path).map_err(io_error)? {
                    files.push(class.wrap_state(Box::new(entry.map_err(io_error)?.path())));
                }
                Ok(Value::new_array(files))
            });
            list_files
        })
        .instance_method("read_bytes", 0, {
            let bytes_class = Rc::clone(&bytes_class);
            let read_bytes: NativeFn = Rc::new(move |_t, this, _args| {
                let data = fs::read(file_state(this)?).map_err(io_error)?;
                Ok(bytes_class.wrap_state(Box::new(data)))
            });
            read_bytes
        })
        .instance_method("read_text", 0, Rc::new(|_t, this, _args| {
            fs::read_to_string(file_state(this)?).map(Value::new_string).map_err(io_error)
        }))
        .instance_method("write_text", 1, Rc::new(|_t, this, args| {
            let text = arg_string(args, 0)?;
            fs::write(file_state(this)?, text).map_err(io_error)?;
            Ok(Value::Void)
        }))
        .instance_method("delete", 0, Rc::new(|_t, this, _args| {
            let path = file_state(this)?;
            let result = if path.is_dir() { fs::remove_dir(&path) } else { fs::remove_file(&path) };
            Ok(Value::Boolean(result.is_ok()))
        }))
        .instance_method("mkdir", 0, Rc::new(|_t, this, _args| {
            Ok(Value::Boolean(fs::create_dir(file_state(this)?).is_ok()))
        }))
        .instance_method("rename_to", 1, Rc::new(|_t, this, args| {
            let dest = PathBuf::from(arg_string(args, 0)?);
            Ok(Value::Boolean(fs::rename(file_state(this)?, dest).is_ok()))
        }))
        .instance_method("text_out", 0, {
            let text_output_class = Rc::clone(&text_output_class);
            let text_out: NativeFn = Rc::new(move |_t, this, _args| {
                let file = open_text_out(&file_state(this)?, false).map_err(io_error)?;
                Ok(text_output_class.wrap_state(Box::new(Box::new(file) as Box<dyn std::io::Write>)))
            });
            text_out
        })
        .instance_method("text_out", 1, {
            let text_output_class = Rc::clone(&text_output_class);
            let text_out: NativeFn = Rc::new(move |_t, this, args| {
                let append = arg_boolean(args, 0)?;
                let file = open_text_out(&file_state(this)?, append).map_err(io_error)?;
                Ok(text_output_class.wrap_state(Box::new(Box::new(file) as Box<dyn std::io::Write>)))
            });
            text_out
        })
        .instance_method("binary_in", 0, {
            let binary_input_class = Rc::clone(&binary_input_class);
            let binary_in: NativeFn = Rc::new(move |_t, this, _args| {
                let file = fs::File::open(file_state(this)?).map_err(io_error)?;
                Ok(binary_input_class.wrap_state(Box::new(file)))
            });
            binary_in
        })
        .instance_method("binary_out", 0, {
            let binary_output_class = Rc::clone(&binary_output_class);
            let binary_out: NativeFn = Rc::new(move |_t, this, _args| {
                let file = fs::OpenOptions::new().write(true).create(true).truncate(true).open(file_state(this)?).map_err(io_error)?;
                Ok(binary_output_class.wrap_state(Box::new(file)))
            });
            binary_out
        })
        .instance_method("binary_out", 1, {
            let binary_output_class = Rc::clone(&binary_output_class);
            let binary_out: NativeFn = Rc::new(move |_t, this, args| {
                let append = arg_boolean(args, 0)?;
                let file = fs::OpenOptions::new().write(true).create(true).append(append).truncate(!append).open(file_state(this)?).map_err(io_error)?;
                Ok(binary_output_class.wrap_state(Box::new(file)))
            });
            binary_out
        })
        .build();
    self_class.set(Rc::clone(&descriptor)).ok();
    descriptor
}

// ---------------------------------------------------------------------------------------
// Socket / ServerSocket — plain std::net TCP, single-arity read/write only; the
// offset/length overloads the original exposes are left unregistered as the same
// scope reduction applied to the rest of the collection/file surface.
// ---------------------------------------------------------------------------------------

fn build_socket_class(registry: &NameRegistry, bytes_class: &Rc<SysClassDescriptor>) -> Rc<SysClassDescriptor> {
    let bytes_class = Rc::clone(bytes_class);
    SysClassBuilder::new(registry, "Socket")
        .constructor(2, Rc::new(|_t, args| {
            let host = arg_string(args, 0)?;
            let port = arg_integer(args, 1)?;
            let stream = TcpStream::connect((host.as_str(), port as u16)).map_err(io_error)?;
            Ok(Box::new(stream) as Box<dyn Any>)
        }))
        .instance_method("get_remote_host", 0, Rc::new(|_t, this, _args| {
            with_state::<TcpStream, _>(this, |s| {
                Ok(Value::new_string(s.peer_addr().map(|a| a.ip().to_string()).unwrap_or_default()))
            })
        }))
        .instance_method("get_remote_port", 0, Rc::new(|_t, this, _args| {
            with_state::<TcpStream, _>(this, |s| {
                Ok(Value::Integer(i64::from(s.peer_addr().map(|a| a.port()).unwrap_or(0))))
            })
        }))
        .instance_method("read_byte", 0, Rc::new(|_t, this, _args| {
            with_state_mut::<TcpStream, _>(this, |s| {
                let mut buf = [0u8; 1];
                match s.read(&mut buf) {
                    Ok(0) => Ok(Value::Integer(-1)),
                    Ok(_) => Ok(Value::Integer(i64::from(buf[0]))),
                    Err(e) => Err(io_error(e)),
                }
            })
        }))
        .instance_method("read", 1, {
            let bytes_class = Rc::clone(&bytes_class);
            let read_fn: NativeFn = Rc::new(move |_t, this, args| {
                let want = arg_integer(args, 0)?.max(0) as usize;
                with_state_mut::<TcpStream, _>(this, |s| {
                    let mut buf = vec![0u8; want];
                    let n = s.read(&mut buf).map_err(io_error)?;
                    buf.truncate(n);
                    Ok(bytes_class.wrap_state(Box::new(buf)))
                })
            });
            read_fn
        })
        .instance_method("write_byte", 1, Rc::new(|_t, this, args| {
            let b = arg_integer(args, 0)?;
            if !(0..=255).contains(&b) {
                return Err(RuntimeError::new("Value out of bounds"));
            }
            with_state_mut::<TcpStream, _>(this, |s| {
                s.write_all(&[b as u8]).map_err(io_error)?;
                Ok(Value::Void)
            })
        }))
        .instance_method("write", 1, Rc::new(|_t, this, args| {
            let Some(Value::SysObject(bytes)) = args.first() else { return Err(wrong_args()) };
            let data = bytes.state().borrow().downcast_ref::<Vec<u8>>().expect("host bridge: expected Bytes state").clone();
            with_state_mut::<TcpStream, _>(this, |s| {
                s.write_all(&data).map_err(io_error)?;
                Ok(Value::Void)
            })
        }))
        .instance_method("close", 0, Rc::new(|_t, _this, _args| Ok(Value::Void)))
        .build()
}

fn build_server_socket_class(registry: &NameRegistry, socket_class: Rc<SysClassDescriptor>) -> Rc<SysClassDescriptor> {
    SysClassBuilder::new(registry, "ServerSocket")
        .constructor(1, Rc::new(|_t, args| {
            let port = arg_integer(args, 0)?;
            let listener = TcpListener::bind(("0.0.0.0", port as u16)).map_err(io_error)?;
            Ok(Box::new(listener) as Box<dyn Any>)
        }))
        .instance_method("accept", 0, {
            let socket_class = Rc::clone(&socket_class);
            let accept_fn: NativeFn = Rc::new(move |_t, this, _args| {
                let stream = with_state::<TcpListener, _>(this, |listener| {
                    listener.accept().map(|(s, _)| s).map_err(io_error)
                })?;
                Ok(socket_class.wrap_state(Box::new(stream)))
            });
            accept_fn
        })
        .instance_method("close", 0, Rc::new(|_t, _this, _args| Ok(Value::Void)))
        .build()
}

// ---------------------------------------------------------------------------------------
// TextOutput — backs `sys.out`. Not registered as a named class in the namespace (scripts
// never construct one directly); built once at startup and exposed only as the `out`
// static field, mirroring the original's pre-constructed `StdOutTextOutputValue` instance.
// ---------------------------------------------------------------------------------------

fn build_text_output_class(registry: &NameRegistry) -> Rc<SysClassDescriptor> {
    SysClassBuilder::new(registry, "TextOutput")
        .constructor(0, Rc::new(|_t, _args| Ok(Box::new(Box::new(std::io::stdout()) as Box<dyn std::io::Write>) as Box<dyn Any>)))
        .instance_method("print", 1, Rc::new(|_t, this, args| {
            let text = args.first().ok_or_else(wrong_args)?.to_display_string()?;
            with_state_mut::<Box<dyn std::io::Write>, _>(this, |w| {
                w.write_all(text.as_bytes()).map_err(io_error)?;
                Ok(Value::Void)
            })
        }))
        .instance_method("println", 0, Rc::new(|_t, this, _args| {
            with_state_mut::<Box<dyn std::io::Write>, _>(this, |w| {
                w.write_all(b"\n").map_err(io_error)?;
                Ok(Value::Void)
            })
        }))
        .instance_method("println", 1, Rc::new(|_t, this, args| {
            let text = args.first().ok_or_else(wrong_args)?.to_display_string()?;
            with_state_mut::<Box<dyn std::io::Write>, _>(this, |w| {
                w.write_all(text.as_bytes()).map_err(io_error)?;
                w.write_all(b"\n").map_err(io_error)?;
                Ok(Value::Void)
            })
        }))
        .instance_method("close", 0, Rc::new(|_t, this, _args| {
            with_state_mut::<Box<dyn std::io::Write>, _>(this, |w| {
                w.flush().map_err(io_error)?;
                Ok(Value::Void)
            })
        }))
        .build()
}

// ---------------------------------------------------------------------------------------
// Top-level statics and namespace assembly
// ---------------------------------------------------------------------------------------

fn str_to_int(text: &str) -> ValueResult<i64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RuntimeError::new(format!("Not a valid integer: '{text}'")));
    }
    text.parse().map_err(|_| RuntimeError::new(format!("Not a valid integer: '{text}'")))
}

fn current_time_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

fn current_time_str() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Handles produced by [`build`]: the namespace value plus the `String` class descriptor a
/// [`crate::runner::Runner`] needs directly (every `Value::String` delegates its instance
/// member lookups there).
pub struct SysRoot {
    pub namespace: Rc<SysNamespaceDescriptor>,
    pub string_class: Rc<SysClassDescriptor>,
}

/// Builds the whole `sys` namespace. `script_args` becomes `sys.args`; call once per
/// [`crate::runner::Runner`] instance, against that runner's own name registry.
#[must_use]
pub fn build(registry: &NameRegistry, script_args: Vec<String>) -> SysRoot {
    let bytes_class = build_bytes_class(registry);
    let string_class = build_string_class(registry, &bytes_class);
    let string_buffer_class = build_string_buffer_class(registry);
    let array_list_class = build_array_list_class(registry);
    let hash_set_class = build_hash_set_class(registry);
    let hash_map_class = build_hash_map_class(registry);
    let text_output_class = build_text_output_class(registry);
    let binary_input_class = build_binary_input_class(registry, &bytes_class);
    let binary_output_class = build_binary_output_class(registry);
    let file_class = build_file_class(registry, &bytes_class, &text_output_class, &binary_input_class, &binary_output_class);
    let socket_class = build_socket_class(registry, &bytes_class);
    let server_socket_class = build_server_socket_class(registry, Rc::clone(&socket_class));

    let args_value = Value::new_array(script_args.into_iter().map(Value::new_string).collect());
    let out_value = text_output_class
        .instantiate(&crate::resource::NoLimitTracker, &[])
        .unwrap_or(Value::Null);

    let namespace = SysNamespaceBuilder::new(registry, "sys")
        .class("String", Rc::clone(&string_class))
        .class("Bytes", bytes_class)
        .class("StringBuffer", string_buffer_class)
        .class("ArrayList", array_list_class)
        .class("HashSet", hash_set_class)
        .class("HashMap", hash_map_class)
        .class("File", file_class)
        .class("Socket", socket_class)
        .class("ServerSocket", server_socket_class)
        .field("windows", Value::Boolean(cfg!(windows)))
        .field("args", args_value)
        .field("out", out_value)
        .method("current_time_millis", 0, Rc::new(|_t, _this, _args| Ok(Value::Integer(current_time_millis()))))
        .method("current_time_str", 0, Rc::new(|_t, _this, _args| Ok(Value::new_string(current_time_str()))))
        .method("str_to_int", 1, Rc::new(|_t, _this, args| Ok(Value::Integer(str_to_int(&arg_string(args, 0)?)?))))
        .method("execute", 2, Rc::new(|_t, _this, _args| {
            Err(RuntimeError::new("sys.execute requires a separate parser front-end, not available in this build"))
        }))
        .method("execute", 3, Rc::new(|_t, _this, _args| {
            Err(RuntimeError::new("sys.execute requires a separate parser front-end, not available in this build"))
        }))
        .method("execute_ex", 2, Rc::new(|_t, _this, _args| {
            Err(RuntimeError::new("sys.execute_ex requires a separate parser front-end, not available in this build"))
        }))
        .build();

    SysRoot { namespace, string_class }
}
