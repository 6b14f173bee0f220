use hcl::eval::{Context, FuncArgs, FuncDef, ParamType};
use hcl::Value;

/// Declare the fixed function set the in-process evaluator supports. Anything
/// outside this set fails evaluation and falls through to the external
/// console.
pub fn declare(ctx: &mut Context) {
    ctx.declare_func(
        "lower",
        FuncDef::builder().param(ParamType::String).build(lower),
    );
    ctx.declare_func(
        "upper",
        FuncDef::builder().param(ParamType::String).build(upper),
    );
    ctx.declare_func(
        "tostring",
        FuncDef::builder().param(ParamType::Any).build(tostring),
    );
    ctx.declare_func(
        "join",
        FuncDef::builder()
            .param(ParamType::String)
            .param(ParamType::Array(Box::new(ParamType::Any)))
            .build(join),
    );
    ctx.declare_func(
        "concat",
        FuncDef::builder()
            .variadic_param(ParamType::Array(Box::new(ParamType::Any)))
            .build(concat),
    );
    ctx.declare_func(
        "format",
        FuncDef::builder()
            .param(ParamType::String)
            .variadic_param(ParamType::Any)
            .build(format_fn),
    );
    ctx.declare_func(
        "coalesce",
        FuncDef::builder()
            .variadic_param(ParamType::Any)
            .build(coalesce),
    );
    ctx.declare_func(
        "replace",
        FuncDef::builder()
            .param(ParamType::String)
            .param(ParamType::String)
            .param(ParamType::String)
            .build(replace),
    );
}

fn string_arg(args: &FuncArgs, i: usize, func: &str) -> Result<String, String> {
    args[i]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| format!("{func}: argument {i} must be a string"))
}

fn lower(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::from(string_arg(&args, 0, "lower")?.to_lowercase()))
}

fn upper(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::from(string_arg(&args, 0, "upper")?.to_uppercase()))
}

fn tostring(args: FuncArgs) -> Result<Value, String> {
    match &args[0] {
        Value::String(s) => Ok(Value::from(s.clone())),
        Value::Number(n) => Ok(Value::from(n.to_string())),
        Value::Bool(b) => Ok(Value::from(b.to_string())),
        Value::Null => Ok(Value::Null),
        _ => Err("tostring: cannot convert collection to string".to_string()),
    }
}

fn join(args: FuncArgs) -> Result<Value, String> {
    let sep = string_arg(&args, 0, "join")?;
    let items = args[1]
        .as_array()
        .ok_or_else(|| "join: second argument must be a list".to_string())?;
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        match item.as_str() {
            Some(s) => parts.push(s.to_string()),
            None => return Err("join: list elements must be strings".to_string()),
        }
    }
    Ok(Value::from(parts.join(&sep)))
}

fn concat(args: FuncArgs) -> Result<Value, String> {
    let mut out = Vec::new();
    for arg in args.iter() {
        match arg.as_array() {
            Some(items) => out.extend(items.iter().cloned()),
            None => return Err("concat: arguments must be lists".to_string()),
        }
    }
    Ok(Value::Array(out))
}

fn format_fn(args: FuncArgs) -> Result<Value, String> {
    let fmt = string_arg(&args, 0, "format")?;
    let mut rest = args.iter().skip(1);
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(verb @ ('s' | 'd' | 'v' | 'q')) => {
                let arg = rest
                    .next()
                    .ok_or_else(|| "format: not enough arguments".to_string())?;
                out.push_str(&format_verb(arg, verb)?);
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    Ok(Value::from(out))
}

fn format_verb(value: &Value, verb: char) -> Result<String, String> {
    match value {
        Value::String(s) if verb == 'q' => Ok(format!("{s:?}")),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) if verb == 'd' => match n.as_f64() {
            Some(f) => Ok((f as i64).to_string()),
            None => Ok(n.to_string()),
        },
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err("format: unsuitable argument type".to_string()),
    }
}

fn coalesce(args: FuncArgs) -> Result<Value, String> {
    for arg in args.iter() {
        if arg.is_null() {
            continue;
        }
        if let Some(s) = arg.as_str() {
            if s.is_empty() {
                continue;
            }
        }
        return Ok(arg.clone());
    }
    Ok(Value::Null)
}

fn replace(args: FuncArgs) -> Result<Value, String> {
    let s = string_arg(&args, 0, "replace")?;
    let substr = string_arg(&args, 1, "replace")?;
    let repl = string_arg(&args, 2, "replace")?;
    Ok(Value::from(s.replace(&substr, &repl)))
}
