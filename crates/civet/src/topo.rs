// Topology text format — Human-writable net descriptions
//
// Parses the `.topo` format into a NetConfig:
//
//   # a two-layer classifier
//   @net {
//       name: "tiny";
//       force_backward: false;
//       seed: 42;
//   }
//
//   layer data: Data {
//       output x: [2, 3] = gaussian(0.0, 1.0);
//       output labels: [2] = constant(1.0);
//   }
//
//   layer fc1: Linear {
//       input x;
//       output h;
//       out_features: 4;
//       weight_filler: xavier();
//       param { lr_mult: 1.0; }
//       param { lr_mult: 2.0; decay_mult: 0.0; }
//   }
//
//   layer loss: CrossEntropy {
//       input h;
//       input labels;
//       output loss;
//   }
//
// GRAMMAR:
//
//   file     := (netblock | layer)*
//   netblock := "@net" "{" setting* "}"
//   layer    := "layer" IDENT ":" IDENT "{" item* "}"
//   item     := "input" IDENT ";"
//             | "output" IDENT (":" shape ("=" filler)?)? ";"
//             | "param" "{" setting* "}" ";"?
//             | setting
//   setting  := IDENT ":" value ";"
//   value    := NUMBER | STRING | "true" | "false" | IDENT | filler
//   filler   := IDENT "(" (NUMBER ("," NUMBER)*)? ")"
//   shape    := "[" (NUMBER ("," NUMBER)*)? "]"
//
// `#` comments run to end of line. Setting keys match the JSON field
// names (`out_features`, `negative_slope`, ...), so the two encodings
// describe identical configs. Errors carry the 1-based source line.

use std::fmt;

use civet_core::{Error, Result};

use crate::config::{FillerDef, GradPolicy, LayerDef, LayerKind, NetConfig, ParamSpec, SourceDef};

/// Parse topology text into a net config.
pub fn parse(src: &str) -> Result<NetConfig> {
    let toks = lex(src)?;
    Parser { toks, pos: 0 }.parse_file()
}

fn syntax(line: usize, msg: impl Into<String>) -> Error {
    Error::Syntax {
        line,
        msg: msg.into(),
    }
}

// Lexer

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(f64),
    Punct(char),
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Ident(s) => write!(f, "'{s}'"),
            Tok::Str(s) => write!(f, "string \"{s}\""),
            Tok::Num(n) => write!(f, "number {n}"),
            Tok::Punct(c) => write!(f, "'{c}'"),
        }
    }
}

fn lex(src: &str) -> Result<Vec<(Tok, usize)>> {
    let mut toks = Vec::new();
    let mut line = 1usize;
    let mut chars = src.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\n') | None => {
                            return Err(syntax(line, "unterminated string"));
                        }
                        Some(c) => s.push(c),
                    }
                }
                toks.push((Tok::Str(s), line));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                toks.push((Tok::Ident(s), line));
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-') {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: f64 = s
                    .parse()
                    .map_err(|_| syntax(line, format!("bad number '{s}'")))?;
                toks.push((Tok::Num(n), line));
            }
            '@' | '{' | '}' | '[' | ']' | '(' | ')' | ':' | ';' | ',' | '=' => {
                toks.push((Tok::Punct(c), line));
                chars.next();
            }
            other => {
                return Err(syntax(line, format!("unexpected character '{other}'")));
            }
        }
    }
    Ok(toks)
}

// Parser

/// A parsed setting value, before it is matched to a field.
#[derive(Debug, Clone)]
enum Val {
    Num(f64),
    Bool(bool),
    Str(String),
    Word(String),
    Filler(FillerDef),
}

impl Val {
    fn describe(&self) -> &'static str {
        match self {
            Val::Num(_) => "a number",
            Val::Bool(_) => "a boolean",
            Val::Str(_) => "a string",
            Val::Word(_) => "a word",
            Val::Filler(_) => "a filler",
        }
    }
}

struct Parser {
    toks: Vec<(Tok, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(t, _)| t)
    }

    fn line(&self) -> usize {
        self.toks
            .get(self.pos)
            .or_else(|| self.toks.last())
            .map(|&(_, line)| line)
            .unwrap_or(1)
    }

    fn next(&mut self) -> Result<(Tok, usize)> {
        let t = self
            .toks
            .get(self.pos)
            .cloned()
            .ok_or_else(|| syntax(self.line(), "unexpected end of input"))?;
        self.pos += 1;
        Ok(t)
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if matches!(self.peek(), Some(Tok::Punct(p)) if *p == c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<usize> {
        let (t, line) = self.next()?;
        match t {
            Tok::Punct(p) if p == c => Ok(line),
            other => Err(syntax(line, format!("expected '{c}', found {other}"))),
        }
    }

    fn expect_ident(&mut self) -> Result<(String, usize)> {
        let (t, line) = self.next()?;
        match t {
            Tok::Ident(s) => Ok((s, line)),
            other => Err(syntax(line, format!("expected identifier, found {other}"))),
        }
    }

    fn expect_num(&mut self) -> Result<(f64, usize)> {
        let (t, line) = self.next()?;
        match t {
            Tok::Num(n) => Ok((n, line)),
            other => Err(syntax(line, format!("expected number, found {other}"))),
        }
    }

    fn parse_file(mut self) -> Result<NetConfig> {
        let mut cfg = NetConfig::default();
        let mut saw_net_block = false;
        while self.pos < self.toks.len() {
            if self.eat_punct('@') {
                let (kw, line) = self.expect_ident()?;
                if kw != "net" {
                    return Err(syntax(line, format!("unknown block '@{kw}'")));
                }
                if saw_net_block {
                    return Err(syntax(line, "duplicate @net block"));
                }
                saw_net_block = true;
                self.parse_net_block(&mut cfg)?;
            } else {
                let (kw, line) = self.expect_ident()?;
                if kw != "layer" {
                    return Err(syntax(line, format!("expected 'layer' or '@net', found '{kw}'")));
                }
                let def = self.parse_layer()?;
                cfg.layers.push(def);
            }
        }
        Ok(cfg)
    }

    fn parse_net_block(&mut self, cfg: &mut NetConfig) -> Result<()> {
        self.expect_punct('{')?;
        while !self.eat_punct('}') {
            let (key, val, line) = self.parse_setting()?;
            match key.as_str() {
                "name" => match val {
                    Val::Str(s) => cfg.name = s,
                    other => {
                        return Err(syntax(line, format!("name takes a string, found {}", other.describe())));
                    }
                },
                "force_backward" => cfg.force_backward = expect_bool(&key, val, line)?,
                "seed" => cfg.seed = Some(expect_uint(&key, val, line)? as u64),
                "grad_policy" => match val {
                    Val::Word(w) if w == "accumulate" => cfg.grad_policy = GradPolicy::Accumulate,
                    Val::Word(w) if w == "zero_first" => cfg.grad_policy = GradPolicy::ZeroFirst,
                    _ => {
                        return Err(syntax(
                            line,
                            "grad_policy must be 'accumulate' or 'zero_first'",
                        ));
                    }
                },
                other => {
                    return Err(syntax(line, format!("unknown net setting '{other}'")));
                }
            }
        }
        Ok(())
    }

    /// Parse one `layer name: Kind { ... }` block. The `layer` keyword
    /// has already been consumed.
    fn parse_layer(&mut self) -> Result<LayerDef> {
        let (name, layer_line) = self.expect_ident()?;
        self.expect_punct(':')?;
        let (kind_name, _) = self.expect_ident()?;
        self.expect_punct('{')?;

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        // Parallel to `outputs`: optional shape and filler annotations.
        let mut out_meta: Vec<(Option<Vec<usize>>, Option<FillerDef>, usize)> = Vec::new();
        let mut params = Vec::new();
        let mut settings: Vec<(String, Val, usize)> = Vec::new();

        while !self.eat_punct('}') {
            let (word, line) = self.expect_ident()?;
            match word.as_str() {
                "input" => {
                    let (buf, _) = self.expect_ident()?;
                    self.expect_punct(';')?;
                    inputs.push(buf);
                }
                "output" => {
                    let (buf, out_line) = self.expect_ident()?;
                    let mut shape = None;
                    let mut filler = None;
                    if self.eat_punct(':') {
                        shape = Some(self.parse_shape()?);
                        if self.eat_punct('=') {
                            filler = Some(self.parse_filler()?);
                        }
                    }
                    self.expect_punct(';')?;
                    outputs.push(buf);
                    out_meta.push((shape, filler, out_line));
                }
                "param" => {
                    params.push(self.parse_param_block()?);
                    self.eat_punct(';');
                }
                _ => {
                    // A plain `key: value;` setting.
                    self.expect_punct(':')?;
                    let val = self.parse_value()?;
                    self.expect_punct(';')?;
                    settings.push((word, val, line));
                }
            }
        }

        let mut s = Settings {
            entries: settings,
            layer: name.clone(),
            kind: kind_name.clone(),
            line: layer_line,
        };
        let loss_weight = s.take_f32("loss_weight")?;
        let kind = build_kind(&kind_name, &name, layer_line, &mut s, &outputs, &out_meta)?;
        s.finish()?;

        Ok(LayerDef {
            name,
            kind,
            inputs,
            outputs,
            params,
            loss_weight,
        })
    }

    fn parse_param_block(&mut self) -> Result<ParamSpec> {
        self.expect_punct('{')?;
        let mut spec = ParamSpec::default();
        while !self.eat_punct('}') {
            let (key, val, line) = self.parse_setting()?;
            match key.as_str() {
                "lr_mult" => spec.lr_mult = expect_f32(&key, val, line)?,
                "decay_mult" => spec.decay_mult = expect_f32(&key, val, line)?,
                other => {
                    return Err(syntax(line, format!("unknown param setting '{other}'")));
                }
            }
        }
        Ok(spec)
    }

    fn parse_setting(&mut self) -> Result<(String, Val, usize)> {
        let (key, line) = self.expect_ident()?;
        self.expect_punct(':')?;
        let val = self.parse_value()?;
        self.expect_punct(';')?;
        Ok((key, val, line))
    }

    fn parse_value(&mut self) -> Result<Val> {
        let (t, line) = self.next()?;
        match t {
            Tok::Num(n) => Ok(Val::Num(n)),
            Tok::Str(s) => Ok(Val::Str(s)),
            Tok::Ident(w) if w == "true" => Ok(Val::Bool(true)),
            Tok::Ident(w) if w == "false" => Ok(Val::Bool(false)),
            Tok::Ident(w) => {
                if matches!(self.peek(), Some(Tok::Punct('('))) {
                    self.pos -= 1;
                    Ok(Val::Filler(self.parse_filler()?))
                } else {
                    Ok(Val::Word(w))
                }
            }
            other => Err(syntax(line, format!("expected a value, found {other}"))),
        }
    }

    /// `name(arg, ...)` filler call.
    fn parse_filler(&mut self) -> Result<FillerDef> {
        let (name, line) = self.expect_ident()?;
        self.expect_punct('(')?;
        let mut args = Vec::new();
        if !self.eat_punct(')') {
            loop {
                let (n, _) = self.expect_num()?;
                args.push(n as f32);
                if self.eat_punct(')') {
                    break;
                }
                self.expect_punct(',')?;
            }
        }
        let arity = |want: usize| -> Result<()> {
            if args.len() != want {
                return Err(syntax(
                    line,
                    format!("{name}() takes {want} argument(s), got {}", args.len()),
                ));
            }
            Ok(())
        };
        match name.as_str() {
            "constant" => {
                arity(1)?;
                Ok(FillerDef::Constant { value: args[0] })
            }
            "uniform" => {
                arity(2)?;
                Ok(FillerDef::Uniform {
                    lo: args[0],
                    hi: args[1],
                })
            }
            "gaussian" => {
                arity(2)?;
                Ok(FillerDef::Gaussian {
                    mean: args[0],
                    std: args[1],
                })
            }
            "xavier" => {
                arity(0)?;
                Ok(FillerDef::Xavier)
            }
            other => Err(syntax(line, format!("unknown filler '{other}'"))),
        }
    }

    /// `[d, d, ...]` dimension list; `[]` is a scalar.
    fn parse_shape(&mut self) -> Result<Vec<usize>> {
        self.expect_punct('[')?;
        let mut dims = Vec::new();
        if !self.eat_punct(']') {
            loop {
                let (n, line) = self.expect_num()?;
                dims.push(to_uint(n, line, "dimension")?);
                if self.eat_punct(']') {
                    break;
                }
                self.expect_punct(',')?;
            }
        }
        Ok(dims)
    }
}

// Kind assembly
//
// Settings and output annotations are matched to the fields of the named
// layer kind; anything left over is an error, so typos surface with the
// offending key and line instead of being silently ignored.

struct Settings {
    entries: Vec<(String, Val, usize)>,
    layer: String,
    kind: String,
    line: usize,
}

impl Settings {
    fn take(&mut self, key: &str) -> Option<(Val, usize)> {
        let i = self.entries.iter().position(|(k, _, _)| k == key)?;
        let (_, val, line) = self.entries.remove(i);
        Some((val, line))
    }

    fn take_f32(&mut self, key: &str) -> Result<Option<f32>> {
        match self.take(key) {
            Some((val, line)) => Ok(Some(expect_f32(key, val, line)?)),
            None => Ok(None),
        }
    }

    fn take_usize(&mut self, key: &str) -> Result<Option<usize>> {
        match self.take(key) {
            Some((val, line)) => Ok(Some(expect_uint(key, val, line)?)),
            None => Ok(None),
        }
    }

    fn take_bool(&mut self, key: &str) -> Result<Option<bool>> {
        match self.take(key) {
            Some((val, line)) => Ok(Some(expect_bool(key, val, line)?)),
            None => Ok(None),
        }
    }

    fn take_filler(&mut self, key: &str) -> Result<Option<FillerDef>> {
        match self.take(key) {
            Some((Val::Filler(f), _)) => Ok(Some(f)),
            Some((other, line)) => Err(syntax(
                line,
                format!("{key} takes a filler call, found {}", other.describe()),
            )),
            None => Ok(None),
        }
    }

    fn require_usize(&mut self, key: &str) -> Result<usize> {
        self.take_usize(key)?.ok_or_else(|| {
            syntax(
                self.line,
                format!("{} layer '{}' requires {key}", self.kind, self.layer),
            )
        })
    }

    fn finish(self) -> Result<()> {
        if let Some((key, _, line)) = self.entries.into_iter().next() {
            return Err(syntax(
                line,
                format!("unexpected setting '{key}' for {} layer '{}'", self.kind, self.layer),
            ));
        }
        Ok(())
    }
}

fn build_kind(
    kind: &str,
    layer: &str,
    line: usize,
    s: &mut Settings,
    outputs: &[String],
    out_meta: &[(Option<Vec<usize>>, Option<FillerDef>, usize)],
) -> Result<LayerKind> {
    // Only data-source outputs carry shape or filler annotations.
    if !matches!(kind, "Input" | "Data") {
        if let Some((_, _, meta_line)) = out_meta.iter().find(|(sh, fl, _)| sh.is_some() || fl.is_some()) {
            return Err(syntax(
                *meta_line,
                format!("only Input and Data outputs take shapes, not {kind}"),
            ));
        }
    }
    match kind {
        "Input" => {
            let mut shapes = Vec::new();
            for (name, (shape, filler, meta_line)) in outputs.iter().zip(out_meta) {
                if filler.is_some() {
                    return Err(syntax(*meta_line, "Input outputs take no filler"));
                }
                match shape {
                    Some(dims) => shapes.push(dims.clone()),
                    None => {
                        return Err(syntax(
                            *meta_line,
                            format!("Input output '{name}' needs a shape"),
                        ));
                    }
                }
            }
            Ok(LayerKind::Input { shapes })
        }
        "Data" => {
            let mut defs = Vec::new();
            for (name, (shape, filler, meta_line)) in outputs.iter().zip(out_meta) {
                match (shape, filler) {
                    (Some(dims), Some(f)) => defs.push(SourceDef {
                        shape: dims.clone(),
                        filler: f.clone(),
                    }),
                    _ => {
                        return Err(syntax(
                            *meta_line,
                            format!("Data output '{name}' needs a shape and a filler"),
                        ));
                    }
                }
            }
            Ok(LayerKind::Data { sources: defs })
        }
        "Linear" => Ok(LayerKind::Linear {
            out_features: s.require_usize("out_features")?,
            bias: s.take_bool("bias")?.unwrap_or(true),
            weight_filler: s.take_filler("weight_filler")?,
            bias_filler: s.take_filler("bias_filler")?,
        }),
        "Conv2d" => Ok(LayerKind::Conv2d {
            out_channels: s.require_usize("out_channels")?,
            kernel: s.require_usize("kernel")?,
            stride: s.take_usize("stride")?.unwrap_or(1),
            pad: s.take_usize("pad")?.unwrap_or(0),
            bias: s.take_bool("bias")?.unwrap_or(true),
            weight_filler: s.take_filler("weight_filler")?,
            bias_filler: s.take_filler("bias_filler")?,
        }),
        "MaxPool2d" => Ok(LayerKind::MaxPool2d {
            kernel: s.require_usize("kernel")?,
            stride: s.take_usize("stride")?,
            pad: s.take_usize("pad")?.unwrap_or(0),
        }),
        "Relu" => Ok(LayerKind::Relu {
            negative_slope: s.take_f32("negative_slope")?.unwrap_or(0.0),
        }),
        "Sigmoid" => Ok(LayerKind::Sigmoid),
        "Tanh" => Ok(LayerKind::Tanh),
        "Softmax" => Ok(LayerKind::Softmax {
            axis: s.take_usize("axis")?.unwrap_or(1),
        }),
        "CrossEntropy" => Ok(LayerKind::CrossEntropy),
        "MseLoss" => Ok(LayerKind::MseLoss),
        other => Err(syntax(
            line,
            format!("unknown layer kind '{other}' for layer '{layer}'"),
        )),
    }
}

fn expect_f32(key: &str, val: Val, line: usize) -> Result<f32> {
    match val {
        Val::Num(n) => Ok(n as f32),
        other => Err(syntax(
            line,
            format!("{key} takes a number, found {}", other.describe()),
        )),
    }
}

fn expect_bool(key: &str, val: Val, line: usize) -> Result<bool> {
    match val {
        Val::Bool(b) => Ok(b),
        other => Err(syntax(
            line,
            format!("{key} takes true or false, found {}", other.describe()),
        )),
    }
}

fn expect_uint(key: &str, val: Val, line: usize) -> Result<usize> {
    match val {
        Val::Num(n) => to_uint(n, line, key),
        other => Err(syntax(
            line,
            format!("{key} takes a non-negative integer, found {}", other.describe()),
        )),
    }
}

fn to_uint(n: f64, line: usize, what: &str) -> Result<usize> {
    if n < 0.0 || n.fract() != 0.0 {
        return Err(syntax(
            line,
            format!("{what} must be a non-negative integer, got {n}"),
        ));
    }
    Ok(n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINY: &str = r#"
        # two-layer classifier
        @net {
            name: "tiny";
            force_backward: true;
            seed: 42;
            grad_policy: zero_first;
        }

        layer data: Data {
            output x: [2, 3] = gaussian(0.0, 1.0);
            output labels: [2] = constant(1.0);
        }

        layer fc1: Linear {
            input x;
            output h;
            out_features: 4;
            weight_filler: xavier();
            param { lr_mult: 1.0; }
            param { lr_mult: 2.0; decay_mult: 0.0; }
        }

        layer act: Relu {
            input h;
            output h;
            negative_slope: 0.1;
        }

        layer loss: CrossEntropy {
            input h;
            input labels;
            output loss;
            loss_weight: 0.5;
        }
    "#;

    #[test]
    fn test_parse_reference_net() {
        let cfg = parse(TINY).unwrap();
        assert_eq!(cfg.name, "tiny");
        assert!(cfg.force_backward);
        assert_eq!(cfg.seed, Some(42));
        assert_eq!(cfg.grad_policy, GradPolicy::ZeroFirst);
        assert_eq!(cfg.layers.len(), 4);

        let data = &cfg.layers[0];
        assert_eq!(data.name, "data");
        assert_eq!(data.outputs, vec!["x", "labels"]);
        match &data.kind {
            LayerKind::Data { sources } => {
                assert_eq!(sources[0].shape, vec![2, 3]);
                assert_eq!(
                    sources[1].filler,
                    FillerDef::Constant { value: 1.0 }
                );
            }
            other => panic!("wrong kind: {}", other.name()),
        }

        let fc = &cfg.layers[1];
        assert_eq!(fc.inputs, vec!["x"]);
        assert_eq!(fc.params.len(), 2);
        assert_eq!(fc.params[1].lr_mult, 2.0);
        assert_eq!(fc.params[1].decay_mult, 0.0);
        match &fc.kind {
            LayerKind::Linear {
                out_features,
                weight_filler,
                ..
            } => {
                assert_eq!(*out_features, 4);
                assert_eq!(*weight_filler, Some(FillerDef::Xavier));
            }
            other => panic!("wrong kind: {}", other.name()),
        }

        // In-place wiring parses as equal input and output names.
        let act = &cfg.layers[2];
        assert_eq!(act.inputs, act.outputs);

        let loss = &cfg.layers[3];
        assert_eq!(loss.inputs, vec!["h", "labels"]);
        assert_eq!(loss.loss_weight, Some(0.5));
    }

    #[test]
    fn test_defaults_without_net_block() {
        let cfg = parse("layer a: Sigmoid { input x; output y; }").unwrap();
        assert_eq!(cfg.name, "");
        assert!(!cfg.force_backward);
        assert_eq!(cfg.seed, None);
        assert_eq!(cfg.grad_policy, GradPolicy::Accumulate);
    }

    #[test]
    fn test_scalar_shape() {
        let cfg = parse("layer d: Data { output s: [] = constant(3.0); }").unwrap();
        match &cfg.layers[0].kind {
            LayerKind::Data { sources } => assert!(sources[0].shape.is_empty()),
            _ => panic!("wrong kind"),
        }
    }

    #[test]
    fn test_matches_json_encoding() {
        let from_text = parse(TINY).unwrap();
        let json = from_text.to_json().unwrap();
        let from_json = NetConfig::from_json(&json).unwrap();
        assert_eq!(from_text, from_json);
    }

    #[test]
    fn test_error_unknown_kind() {
        let err = parse("layer a: Warp {\n}").unwrap_err();
        match err {
            Error::Syntax { line, msg } => {
                assert_eq!(line, 1);
                assert!(msg.contains("Warp"), "{msg}");
            }
            other => panic!("wrong error: {other}"),
        }
    }

    #[test]
    fn test_error_line_numbers() {
        let src = "layer a: Linear {\n    input x;\n    output y;\n    out_features: oops;\n}";
        let err = parse(src).unwrap_err();
        match err {
            Error::Syntax { line, .. } => assert_eq!(line, 4),
            other => panic!("wrong error: {other}"),
        }
    }

    #[test]
    fn test_error_missing_required_setting() {
        let err = parse("layer a: Linear { input x; output y; }").unwrap_err();
        match err {
            Error::Syntax { msg, .. } => assert!(msg.contains("out_features"), "{msg}"),
            other => panic!("wrong error: {other}"),
        }
    }

    #[test]
    fn test_error_unknown_setting() {
        let err = parse("layer a: Tanh { input x; output y; warp: 3; }").unwrap_err();
        match err {
            Error::Syntax { msg, .. } => assert!(msg.contains("warp"), "{msg}"),
            other => panic!("wrong error: {other}"),
        }
    }

    #[test]
    fn test_error_shape_on_plain_layer() {
        let err = parse("layer a: Relu { input x; output y: [3]; }").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn test_error_filler_arity() {
        let err = parse("layer d: Data { output x: [2] = gaussian(1.0); }").unwrap_err();
        match err {
            Error::Syntax { msg, .. } => assert!(msg.contains("2 argument"), "{msg}"),
            other => panic!("wrong error: {other}"),
        }
    }

    #[test]
    fn test_error_unterminated_string() {
        let err = parse("@net { name: \"oops; }").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn test_negative_filler_args() {
        let cfg = parse("layer d: Data { output x: [2] = uniform(-1.5, 2.5); }").unwrap();
        match &cfg.layers[0].kind {
            LayerKind::Data { sources } => {
                assert_eq!(
                    sources[0].filler,
                    FillerDef::Uniform { lo: -1.5, hi: 2.5 }
                );
            }
            _ => panic!("wrong kind"),
        }
    }
}
