//! Macro line compilation.
//!
//! Turns a macro body into structured ops: plain G-code, `[expr]`
//! interpolation, assignments, and the `%` directive set. With scripting
//! disabled only plain G-code, `$`-commands, the basic directives, and
//! comment metadata survive.

use simplesender_core::MacroError;

use crate::script::{eval, MacroVars, Value};

/// A piece of an interpolated line.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal text.
    Text(String),
    /// Expression inside `[...]`.
    Expr(String),
}

/// Condition of an `%if` block.
#[derive(Debug, Clone, PartialEq)]
pub enum CondKind {
    /// `%if running`.
    Running,
    /// `%if paused`.
    Paused,
    /// `%if not running`.
    NotRunning,
    /// `%if <expr>` (scripting only).
    Expr(String),
}

/// One compiled macro operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// A G-code (or `$`) line, possibly with `[expr]` segments.
    Line {
        /// Segments to join after evaluation.
        segments: Vec<Segment>,
        /// 1-based macro file line for diagnostics.
        source_line: usize,
    },
    /// `name = expr` assignment.
    Assign {
        /// Target variable.
        name: String,
        /// Expression text.
        expr: String,
        /// 1-based macro file line.
        source_line: usize,
    },
    /// `%wait` until the machine is idle.
    Wait,
    /// `%msg <text>` console message.
    Msg(String),
    /// `%update`: request a fresh status sample.
    Update,
    /// `%state_return`: restore the modal snapshot now.
    StateReturn,
    /// `%if` block.
    If {
        /// Condition.
        cond: CondKind,
        /// Ops when true.
        then_ops: Vec<Op>,
        /// Ops when false.
        else_ops: Vec<Op>,
    },
    /// `%for var = a .. b` inclusive loop.
    For {
        /// Loop variable.
        var: String,
        /// Start expression.
        from: String,
        /// End expression (inclusive).
        to: String,
        /// Loop body.
        body: Vec<Op>,
    },
}

fn compile_error(line: usize, reason: impl Into<String>) -> MacroError {
    MacroError::CompileError {
        line,
        reason: reason.into(),
    }
}

/// Split a line into text/expression segments on `[...]`.
fn split_segments(line: &str, line_no: usize) -> Result<Vec<Segment>, MacroError> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut expr = String::new();
    let mut depth = 0usize;
    for ch in line.chars() {
        match ch {
            '[' => {
                if depth == 0 {
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                } else {
                    expr.push(ch);
                }
                depth += 1;
            }
            ']' => {
                if depth == 0 {
                    return Err(compile_error(line_no, "unbalanced ']'"));
                }
                depth -= 1;
                if depth == 0 {
                    segments.push(Segment::Expr(std::mem::take(&mut expr)));
                } else {
                    expr.push(ch);
                }
            }
            _ => {
                if depth > 0 {
                    expr.push(ch);
                } else {
                    text.push(ch);
                }
            }
        }
    }
    if depth != 0 {
        return Err(compile_error(line_no, "unbalanced '['"));
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    Ok(segments)
}

fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn is_assignment(line: &str) -> Option<(String, String)> {
    let pos = line.find('=')?;
    // Comparison operators are not assignments.
    if line[pos..].starts_with("==") || pos > 0 && matches!(&line[pos - 1..pos], "<" | ">" | "!") {
        return None;
    }
    let name = line[..pos].trim();
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        || name.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true)
    {
        return None;
    }
    Some((name.to_string(), line[pos + 1..].trim().to_string()))
}

struct Compiler {
    scripting: bool,
}

enum Block {
    If {
        cond: CondKind,
        then_ops: Vec<Op>,
        else_ops: Vec<Op>,
        in_else: bool,
    },
    For {
        var: String,
        from: String,
        to: String,
        body: Vec<Op>,
    },
}

impl Compiler {
    fn push(stack: &mut Vec<Block>, ops: &mut Vec<Op>, op: Op) {
        match stack.last_mut() {
            Some(Block::If {
                then_ops,
                else_ops,
                in_else,
                ..
            }) => {
                if *in_else {
                    else_ops.push(op);
                } else {
                    then_ops.push(op);
                }
            }
            Some(Block::For { body, .. }) => body.push(op),
            None => ops.push(op),
        }
    }

    fn directive(
        &self,
        stack: &mut Vec<Block>,
        ops: &mut Vec<Op>,
        line: &str,
        line_no: usize,
    ) -> Result<(), MacroError> {
        let body = line[1..].trim();
        let (word, rest) = match body.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r.trim()),
            None => (body, ""),
        };
        match word.to_ascii_lowercase().as_str() {
            "wait" => Self::push(stack, ops, Op::Wait),
            "msg" => Self::push(stack, ops, Op::Msg(rest.to_string())),
            "update" => Self::push(stack, ops, Op::Update),
            "state_return" | "state-return" => Self::push(stack, ops, Op::StateReturn),
            "if" => {
                let cond = match rest.to_ascii_lowercase().as_str() {
                    "running" => CondKind::Running,
                    "paused" => CondKind::Paused,
                    "not running" => CondKind::NotRunning,
                    "" => return Err(compile_error(line_no, "%if needs a condition")),
                    _ => {
                        if !self.scripting {
                            return Err(MacroError::ScriptingDisabled);
                        }
                        CondKind::Expr(rest.to_string())
                    }
                };
                stack.push(Block::If {
                    cond,
                    then_ops: Vec::new(),
                    else_ops: Vec::new(),
                    in_else: false,
                });
            }
            "else" => match stack.last_mut() {
                Some(Block::If { in_else, .. }) if !*in_else => *in_else = true,
                _ => return Err(compile_error(line_no, "%else without %if")),
            },
            "endif" => match stack.pop() {
                Some(Block::If {
                    cond,
                    then_ops,
                    else_ops,
                    ..
                }) => Self::push(
                    stack,
                    ops,
                    Op::If {
                        cond,
                        then_ops,
                        else_ops,
                    },
                ),
                _ => return Err(compile_error(line_no, "%endif without %if")),
            },
            "for" => {
                if !self.scripting {
                    return Err(MacroError::ScriptingDisabled);
                }
                // %for i = 1 .. 5
                let Some((var, range)) = rest.split_once('=') else {
                    return Err(compile_error(line_no, "%for needs 'var = a .. b'"));
                };
                let Some((from, to)) = range.split_once("..") else {
                    return Err(compile_error(line_no, "%for needs 'a .. b'"));
                };
                stack.push(Block::For {
                    var: var.trim().to_string(),
                    from: from.trim().to_string(),
                    to: to.trim().to_string(),
                    body: Vec::new(),
                });
            }
            "endfor" => match stack.pop() {
                Some(Block::For { var, from, to, body }) => {
                    Self::push(stack, ops, Op::For { var, from, to, body })
                }
                _ => return Err(compile_error(line_no, "%endfor without %for")),
            },
            other => {
                return Err(compile_error(
                    line_no,
                    format!("unknown directive %{}", other),
                ))
            }
        }
        Ok(())
    }
}

/// Compile a macro body into ops.
///
/// `lines` is the body (after the four header lines); `line_offset` is
/// the 1-based file line of the first body line.
pub fn compile_program(
    lines: &[String],
    line_offset: usize,
    scripting: bool,
) -> Result<Vec<Op>, MacroError> {
    let compiler = Compiler { scripting };
    let mut ops: Vec<Op> = Vec::new();
    let mut stack: Vec<Block> = Vec::new();

    for (i, raw) in lines.iter().enumerate() {
        let line_no = line_offset + i;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('%') {
            compiler.directive(&mut stack, &mut ops, line, line_no)?;
            continue;
        }

        // Raw GRBL $-commands pass through untouched, scripting or not.
        if line.starts_with('$') {
            Compiler::push(
                &mut stack,
                &mut ops,
                Op::Line {
                    segments: vec![Segment::Text(line.to_string())],
                    source_line: line_no,
                },
            );
            continue;
        }

        // With scripting off, anything that still smells of scripting
        // (leading `_` identifier, any `=`) must not reach GRBL as
        // literal G-code.
        if !scripting && (line.starts_with('_') || line.contains('=')) {
            return Err(MacroError::ScriptingDisabled);
        }

        if let Some((name, expr)) = is_assignment(line) {
            if !scripting {
                return Err(MacroError::ScriptingDisabled);
            }
            Compiler::push(
                &mut stack,
                &mut ops,
                Op::Assign {
                    name,
                    expr,
                    source_line: line_no,
                },
            );
            continue;
        }

        if line.contains('[') || line.contains(']') {
            if !scripting {
                return Err(MacroError::ScriptingDisabled);
            }
            let segments = split_segments(line, line_no)?;
            Compiler::push(
                &mut stack,
                &mut ops,
                Op::Line {
                    segments,
                    source_line: line_no,
                },
            );
            continue;
        }

        Compiler::push(
            &mut stack,
            &mut ops,
            Op::Line {
                segments: vec![Segment::Text(line.to_string())],
                source_line: line_no,
            },
        );
    }

    if !stack.is_empty() {
        return Err(compile_error(
            line_offset + lines.len(),
            "unterminated %if/%for block",
        ));
    }
    Ok(ops)
}

/// Render an interpolated line against the variable map.
pub fn render_line(segments: &[Segment], vars: &MacroVars) -> Result<String, MacroError> {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(t) => out.push_str(t),
            Segment::Expr(e) => {
                let value = eval(e, vars)?;
                out.push_str(&value.to_string());
            }
        }
    }
    Ok(out.trim().to_string())
}

/// Evaluate an `%if` condition.
pub fn eval_cond(cond: &CondKind, vars: &MacroVars) -> Result<bool, MacroError> {
    let truthy = |name: &str| {
        vars.get(name)
            .map(|v| matches!(v, Value::Bool(true)) || matches!(v, Value::Number(n) if *n != 0.0))
            .unwrap_or(false)
    };
    Ok(match cond {
        CondKind::Running => truthy("running"),
        CondKind::Paused => truthy("paused"),
        CondKind::NotRunning => !truthy("running"),
        CondKind::Expr(expr) => match eval(expr, vars)? {
            Value::Bool(b) => b,
            Value::Number(n) => n != 0.0,
            Value::Str(s) => !s.is_empty(),
        },
    })
}
