// Template engine: `%(name)s` substitution over a variable set

use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

/// Variables whose name starts with this marker are computed: their value is
/// an expression evaluated against a [`FunctionTable`].
pub const COMPUTED_MARKER: char = '.';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("missing template variable '{0}'")]
    MissingVariable(String),
    #[error("malformed placeholder at offset {offset}: {reason}")]
    Format { offset: usize, reason: String },
    #[error("unknown function '{0}' in computed variable")]
    UnknownFunction(String),
    #[error("cannot evaluate '{expr}': {reason}")]
    Evaluation { expr: String, reason: String },
}

fn eval_error(reason: impl Into<String>) -> TemplateError {
    TemplateError::Evaluation {
        expr: String::new(),
        reason: reason.into(),
    }
}

/// Template variable set, ordered by name.
///
/// Cloned per iteration; nothing mutates a shared instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    vars: BTreeMap<String, String>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Copy of this set with one extra binding.
    pub fn with(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.set(name, value);
        copy
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Computed entries as (unprefixed name, expression).
    pub fn computed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter()
            .filter_map(|(k, v)| k.strip_prefix(COMPUTED_MARKER).map(|name| (name, v)))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Variables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut vars = Variables::new();
        for (k, v) in iter {
            vars.set(k, v);
        }
        vars
    }
}

/// A pure function usable from a computed variable. Receives the working
/// variable set and the call's arguments.
pub type ComputedFn = fn(&Variables, &[&str]) -> Result<String, TemplateError>;

/// Registry of functions computed variables may call.
#[derive(Clone)]
pub struct FunctionTable {
    functions: HashMap<String, ComputedFn>,
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FunctionTable {
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Table with the stock functions: `random_hex`, `random_int`, `branch`,
    /// `unix_time`, `seq_offset` and `var`.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.register("random_hex", fn_random_hex);
        table.register("random_int", fn_random_int);
        table.register("branch", fn_branch);
        table.register("unix_time", fn_unix_time);
        table.register("seq_offset", fn_seq_offset);
        table.register("var", fn_var);
        table
    }

    pub fn register(&mut self, name: impl Into<String>, f: ComputedFn) {
        self.functions.insert(name.into(), f);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Evaluate `name` or `name(arg, ...)` against `vars`.
    pub fn evaluate(&self, expr: &str, vars: &Variables) -> Result<String, TemplateError> {
        let (name, args) = parse_call(expr)?;
        let f = self
            .functions
            .get(name)
            .ok_or_else(|| TemplateError::UnknownFunction(name.to_string()))?;
        f(vars, &args).map_err(|e| match e {
            TemplateError::Evaluation { reason, .. } => TemplateError::Evaluation {
                expr: expr.to_string(),
                reason,
            },
            other => other,
        })
    }
}

fn parse_call(expr: &str) -> Result<(&str, Vec<&str>), TemplateError> {
    let expr = expr.trim();
    let malformed = || TemplateError::Evaluation {
        expr: expr.to_string(),
        reason: "expected `name` or `name(arg, ...)`".to_string(),
    };

    let (name, args) = match expr.split_once('(') {
        Some((name, tail)) => {
            let inner = tail.strip_suffix(')').ok_or_else(malformed)?;
            let args = inner
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .collect();
            (name.trim(), args)
        }
        None => (expr, Vec::new()),
    };

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(malformed());
    }
    Ok((name, args))
}

fn arg_or<'a>(args: &[&'a str], idx: usize, default: &'a str) -> &'a str {
    args.get(idx).copied().unwrap_or(default)
}

fn parse_num<T: std::str::FromStr>(raw: &str) -> Result<T, TemplateError> {
    raw.parse()
        .map_err(|_| eval_error(format!("'{}' is not a number", raw)))
}

fn random_hex(n: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..n).map(|_| HEX[rng.gen_range(0..HEX.len())] as char).collect()
}

fn fn_random_hex(_: &Variables, args: &[&str]) -> Result<String, TemplateError> {
    let n: usize = parse_num(arg_or(args, 0, "16"))?;
    if n == 0 || n > 256 {
        return Err(eval_error("length must be between 1 and 256"));
    }
    Ok(random_hex(n))
}

fn fn_random_int(_: &Variables, args: &[&str]) -> Result<String, TemplateError> {
    if args.len() != 2 {
        return Err(eval_error("random_int takes (low, high)"));
    }
    let lo: i64 = parse_num(args[0])?;
    let hi: i64 = parse_num(args[1])?;
    if lo > hi {
        return Err(eval_error("low bound is greater than high bound"));
    }
    Ok(rand::thread_rng().gen_range(lo..=hi).to_string())
}

fn fn_branch(_: &Variables, _: &[&str]) -> Result<String, TemplateError> {
    Ok(format!("z9hG4bK{}", random_hex(16)))
}

fn fn_unix_time(_: &Variables, _: &[&str]) -> Result<String, TemplateError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .map_err(|e| eval_error(e.to_string()))
}

fn fn_seq_offset(vars: &Variables, args: &[&str]) -> Result<String, TemplateError> {
    let seq = vars
        .get("seq")
        .ok_or_else(|| TemplateError::MissingVariable("seq".to_string()))?;
    let seq: i64 = parse_num(seq)?;
    let offset: i64 = parse_num(arg_or(args, 0, "0"))?;
    Ok((seq + offset).to_string())
}

fn fn_var(vars: &Variables, args: &[&str]) -> Result<String, TemplateError> {
    let name = args
        .first()
        .ok_or_else(|| eval_error("var takes a variable name"))?;
    vars.get(name)
        .map(str::to_string)
        .ok_or_else(|| TemplateError::MissingVariable(name.to_string()))
}

/// Evaluate every computed variable of `vars` and bind the result under the
/// unprefixed name in a copy of the set.
pub fn resolve_computed(vars: &Variables, table: &FunctionTable) -> Result<Variables, TemplateError> {
    let mut working = vars.clone();
    for (name, expr) in vars.computed() {
        let value = table.evaluate(expr, &working)?;
        working.set(name, value);
    }
    Ok(working)
}

/// Replace `%(name)s` placeholders with values from `vars`.
///
/// `%%` renders a literal `%`. Conversion characters `s`, `d`, `i` and `r`
/// all insert the string value. Unused variables are ignored.
pub fn substitute(template: &str, vars: &Variables) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let at = offset + pos;
        let after = &rest[pos + 1..];

        let consumed = if after.starts_with('%') {
            out.push('%');
            2
        } else if let Some(inner) = after.strip_prefix('(') {
            let close = inner.find(')').ok_or_else(|| TemplateError::Format {
                offset: at,
                reason: "unterminated placeholder".to_string(),
            })?;
            let name = &inner[..close];
            match inner[close + 1..].chars().next() {
                Some('s' | 'd' | 'i' | 'r') => {}
                _ => {
                    return Err(TemplateError::Format {
                        offset: at,
                        reason: format!("unsupported conversion after %({})", name),
                    })
                }
            }
            let value = vars
                .get(name)
                .ok_or_else(|| TemplateError::MissingVariable(name.to_string()))?;
            out.push_str(value);
            // '%' '(' name ')' conversion
            close + 4
        } else {
            return Err(TemplateError::Format {
                offset: at,
                reason: "unsupported format character".to_string(),
            });
        };

        offset = at + consumed;
        rest = &rest[pos + consumed..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Resolve computed variables, then substitute.
pub fn render(template: &str, vars: &Variables, table: &FunctionTable) -> Result<String, TemplateError> {
    let working = resolve_computed(vars, table)?;
    substitute(template, &working)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Variables {
        [("dest_ip", "10.0.0.2"), ("dest_port", "5060"), ("seq", "3")]
            .into_iter()
            .collect()
    }

    // --- substitute ---

    #[test]
    fn test_substitute_named_placeholders() {
        let out = substitute("OPTIONS sip:%(dest_ip)s:%(dest_port)s SIP/2.0", &vars()).unwrap();
        assert_eq!(out, "OPTIONS sip:10.0.0.2:5060 SIP/2.0");
    }

    #[test]
    fn test_substitute_ignores_unused_variables() {
        assert_eq!(substitute("no placeholders", &vars()).unwrap(), "no placeholders");
    }

    #[test]
    fn test_substitute_missing_variable() {
        let err = substitute("To: %(user)s", &vars()).unwrap_err();
        assert_eq!(err, TemplateError::MissingVariable("user".to_string()));
    }

    #[test]
    fn test_substitute_percent_escape() {
        assert_eq!(substitute("100%% of %(seq)d", &vars()).unwrap(), "100% of 3");
    }

    #[test]
    fn test_substitute_bare_percent_is_format_error() {
        assert!(matches!(
            substitute("50% off", &vars()),
            Err(TemplateError::Format { offset: 2, .. })
        ));
    }

    #[test]
    fn test_substitute_unterminated_placeholder() {
        assert!(matches!(
            substitute("x %(dest_ip", &vars()),
            Err(TemplateError::Format { offset: 2, .. })
        ));
    }

    #[test]
    fn test_substitute_bad_conversion() {
        assert!(matches!(
            substitute("%(dest_ip)x", &vars()),
            Err(TemplateError::Format { .. })
        ));
        assert!(matches!(
            substitute("%(dest_ip)", &vars()),
            Err(TemplateError::Format { .. })
        ));
    }

    #[test]
    fn test_substitute_multibyte_text() {
        let v: Variables = [("name", "ü")].into_iter().collect();
        assert_eq!(substitute("héllo %(name)s · ok", &v).unwrap(), "héllo ü · ok");
    }

    // --- computed variables ---

    #[test]
    fn test_resolve_computed_binds_unprefixed_name() {
        let v = vars().with(".next", "seq_offset(1)");
        let working = resolve_computed(&v, &FunctionTable::builtin()).unwrap();
        assert_eq!(working.get("next"), Some("4"));
        assert_eq!(working.get(".next"), Some("seq_offset(1)"));
        assert_eq!(v.get("next"), None);
    }

    #[test]
    fn test_render_uses_computed_value() {
        let v = vars().with(".host", "var(dest_ip)");
        let out = render("To: <sip:%(host)s>", &v, &FunctionTable::builtin()).unwrap();
        assert_eq!(out, "To: <sip:10.0.0.2>");
    }

    #[test]
    fn test_unknown_function_is_error() {
        let v = vars().with(".x", "1 + 1");
        let err = render("%(x)s", &v, &FunctionTable::builtin()).unwrap_err();
        assert!(matches!(err, TemplateError::Evaluation { .. }));

        let v = vars().with(".x", "nope()");
        let err = render("%(x)s", &v, &FunctionTable::builtin()).unwrap_err();
        assert_eq!(err, TemplateError::UnknownFunction("nope".to_string()));
    }

    #[test]
    fn test_evaluation_error_carries_expression() {
        let err = FunctionTable::builtin()
            .evaluate("random_int(9, 1)", &vars())
            .unwrap_err();
        match err {
            TemplateError::Evaluation { expr, .. } => assert_eq!(expr, "random_int(9, 1)"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_builtin_random_hex_length() {
        let table = FunctionTable::builtin();
        assert_eq!(table.evaluate("random_hex", &vars()).unwrap().len(), 16);
        let hex = table.evaluate("random_hex(8)", &vars()).unwrap();
        assert_eq!(hex.len(), 8);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_builtin_random_int_in_range() {
        let table = FunctionTable::builtin();
        for _ in 0..50 {
            let n: i64 = table.evaluate("random_int(1, 3)", &vars()).unwrap().parse().unwrap();
            assert!((1..=3).contains(&n));
        }
    }

    #[test]
    fn test_builtin_branch_magic_cookie() {
        let branch = FunctionTable::builtin().evaluate("branch", &vars()).unwrap();
        assert!(branch.starts_with("z9hG4bK"));
        assert_eq!(branch.len(), 23);
    }

    #[test]
    fn test_builtin_seq_offset_without_seq() {
        let err = FunctionTable::builtin()
            .evaluate("seq_offset(1)", &Variables::new())
            .unwrap_err();
        assert_eq!(err, TemplateError::MissingVariable("seq".to_string()));
    }

    #[test]
    fn test_register_custom_function() {
        fn shout(vars: &Variables, _: &[&str]) -> Result<String, TemplateError> {
            Ok(vars.get("dest_ip").unwrap_or_default().to_uppercase())
        }
        let mut table = FunctionTable::empty();
        table.register("shout", shout);
        assert!(table.contains("shout"));
        assert!(!table.contains("branch"));
        assert_eq!(table.evaluate("shout", &vars()).unwrap(), "10.0.0.2");
    }
}
