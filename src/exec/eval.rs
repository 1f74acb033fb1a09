//! Statement and expression evaluation. The evaluator binds the library
//! surface generated code expects (pd, plt, px, go, alt, sns, datetime,
//! dataframes) and maps each call onto polars operations or chart builders.

use crate::chart::{
    series_labels, series_to_json, series_values, DeclarativeChart, InteractiveFigure, PlotSeries,
    SeriesKind,
};
use crate::error::{Result, VizError};
use crate::table::{parse_datetime_series, TableSet};
use polars::prelude::*;
use serde_json::json;

use super::script::{BinOp, Expr, FPart, Stmt, Target};
use super::value::{Module, Value};
use super::Namespace;

fn err(message: impl Into<String>) -> VizError {
    VizError::Execution(message.into())
}

pub struct Evaluator<'a> {
    pub ns: &'a mut Namespace,
    pub tables: &'a TableSet,
}

impl Evaluator<'_> {
    pub fn exec_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Import { module, alias } => self.bind_import(module, alias.as_deref()),
            Stmt::FromImport {
                module,
                item,
                alias,
            } => {
                let dotted = format!("{}.{}", module, item);
                let target = alias.as_deref().unwrap_or(item);
                match module_for(&dotted).or_else(|| module_for(module)) {
                    Some(module) => {
                        self.ns.set(target, Value::Module(module));
                        Ok(())
                    }
                    None => Err(err(format!("module '{}' is not available", module))),
                }
            }
            Stmt::Assign { targets, value } => {
                let value = self.eval(value)?;
                match targets.as_slice() {
                    [single] => self.assign(single, value),
                    many => {
                        let items = match value {
                            Value::Tuple(items) | Value::List(items) => items,
                            other => {
                                return Err(err(format!(
                                    "cannot unpack {} into {} targets",
                                    other.type_name(),
                                    many.len()
                                )))
                            }
                        };
                        if items.len() != many.len() {
                            return Err(err(format!(
                                "cannot unpack {} values into {} targets",
                                items.len(),
                                many.len()
                            )));
                        }
                        for (target, item) in many.iter().zip(items) {
                            self.assign(target, item)?;
                        }
                        Ok(())
                    }
                }
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(())
            }
        }
    }

    fn bind_import(&mut self, module: &str, alias: Option<&str>) -> Result<()> {
        match alias {
            Some(alias) => match module_for(module) {
                Some(resolved) => {
                    self.ns.set(alias, Value::Module(resolved));
                    Ok(())
                }
                None => Err(err(format!("module '{}' is not available", module))),
            },
            None => {
                let root = module.split('.').next().unwrap_or(module);
                match module_for(root) {
                    Some(resolved) => {
                        self.ns.set(root, Value::Module(resolved));
                        Ok(())
                    }
                    None => Err(err(format!("module '{}' is not available", module))),
                }
            }
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<()> {
        match target {
            Target::Name(name) => {
                self.ns.set(name, value);
                Ok(())
            }
            Target::Subscript { name, key } => {
                let key = match self.eval(key)? {
                    Value::Str(s) => s,
                    other => {
                        return Err(err(format!(
                            "column assignment requires a string key, got {}",
                            other.type_name()
                        )))
                    }
                };
                let mut df = match self.ns.get(name) {
                    Some(Value::Frame(df)) => df.clone(),
                    Some(other) => {
                        return Err(err(format!(
                            "cannot assign a column on {}",
                            other.type_name()
                        )))
                    }
                    None => return Err(err(format!("name '{}' is not defined", name))),
                };
                let series = self.column_value(&key, value, df.height())?;
                df.with_column(series)?;
                self.ns.set(name, Value::Frame(df));
                Ok(())
            }
        }
    }

    fn column_value(&self, name: &str, value: Value, height: usize) -> Result<Series> {
        match value {
            Value::Column(mut s) => {
                s.rename(name);
                Ok(s)
            }
            Value::Int(v) => Ok(Series::new(name, vec![v; height])),
            Value::Float(v) => Ok(Series::new(name, vec![v; height])),
            Value::Str(v) => Ok(Series::new(name, vec![v; height])),
            Value::Bool(v) => Ok(Series::new(name, vec![v; height])),
            Value::List(items) => list_to_series(name, &items),
            other => Err(err(format!(
                "cannot use {} as a column value",
                other.type_name()
            ))),
        }
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Int(v) => Ok(Value::Int(*v)),
            Expr::Float(v) => Ok(Value::Float(*v)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::NoneLit => Ok(Value::None),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FPart::Text(text) => out.push_str(text),
                        FPart::Expr(expr) => out.push_str(&self.eval(expr)?.display()),
                    }
                }
                Ok(Value::Str(out))
            }
            Expr::List(items) => {
                let items = items
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::List(items))
            }
            Expr::Tuple(items) => {
                let items = items
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Tuple(items))
            }
            Expr::Dict(entries) => {
                let mut map = serde_json::Map::new();
                for (key, value) in entries {
                    let key = match self.eval(key)? {
                        Value::Str(s) => s,
                        other => {
                            return Err(err(format!(
                                "dict keys must be strings, got {}",
                                other.type_name()
                            )))
                        }
                    };
                    let value = self.eval(value)?;
                    map.insert(key, value_to_json(&value)?);
                }
                Ok(Value::Trace(serde_json::Value::Object(map)))
            }
            Expr::Name(name) => self
                .ns
                .get(name)
                .cloned()
                .ok_or_else(|| err(format!("name '{}' is not defined", name))),
            Expr::Attr { base, name } => {
                let base = self.eval(base)?;
                self.attr(base, name)
            }
            Expr::Index { base, index } => {
                let base = self.eval(base)?;
                let index = self.eval(index)?;
                self.index(base, index)
            }
            Expr::Call {
                callee,
                args,
                kwargs,
            } => self.eval_call(callee, args, kwargs),
            Expr::Neg(operand) => match self.eval(operand)? {
                Value::Int(v) => Ok(Value::Int(-v)),
                Value::Float(v) => Ok(Value::Float(-v)),
                other => Err(err(format!("cannot negate {}", other.type_name()))),
            },
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(op, left, right)
            }
        }
    }

    fn attr(&mut self, base: Value, name: &str) -> Result<Value> {
        match base {
            Value::Module(Module::Matplotlib) if name == "pyplot" => {
                Ok(Value::Module(Module::Pyplot))
            }
            Value::Module(Module::Pyplot) if matches!(name, "style" | "cm" | "rcParams") => {
                Ok(Value::Module(Module::Pyplot))
            }
            Value::Module(Module::Numpy) if name == "nan" => Ok(Value::Float(f64::NAN)),
            Value::Module(Module::Datetime) if matches!(name, "datetime" | "date") => {
                Ok(Value::Module(Module::Datetime))
            }
            Value::Frame(df) => match name {
                "shape" => Ok(Value::Tuple(vec![
                    Value::Int(df.height() as i64),
                    Value::Int(df.width() as i64),
                ])),
                "columns" => Ok(Value::List(
                    df.get_column_names()
                        .iter()
                        .map(|n| Value::Str(n.to_string()))
                        .collect(),
                )),
                "empty" => Ok(Value::Bool(df.height() == 0)),
                column if df.get_column_names().contains(&column) => {
                    Ok(Value::Column(df.column(column)?.clone()))
                }
                other => Err(err(format!(
                    "'DataFrame' object has no attribute '{}'",
                    other
                ))),
            },
            Value::Column(series) => match name {
                "dt" => Ok(Value::DtAccessor(series)),
                "values" => Ok(Value::Column(series)),
                other => Err(err(format!("'Series' object has no attribute '{}'", other))),
            },
            Value::DtAccessor(series) => match name {
                "year" | "month" | "day" => Ok(Value::Column(dt_component(&series, name)?)),
                other => Err(err(format!(
                    "datetime accessor has no attribute '{}'",
                    other
                ))),
            },
            other => Err(err(format!(
                "'{}' object has no attribute '{}'",
                other.type_name(),
                name
            ))),
        }
    }

    fn index(&mut self, base: Value, index: Value) -> Result<Value> {
        match (base, index) {
            (Value::Tables, Value::Str(name)) => {
                // handing out a copy keeps uploaded tables pristine
                let frame = self
                    .tables
                    .frame(&name)
                    .ok_or_else(|| err(format!("no uploaded table named '{}'", name)))?;
                Ok(Value::Frame(frame.clone()))
            }
            (Value::Frame(df), Value::Str(column)) => Ok(Value::Column(df.column(&column)?.clone())),
            (Value::Frame(df), Value::List(keys)) => {
                let names = keys
                    .iter()
                    .map(|k| {
                        k.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| err("column selection requires string names"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Frame(df.select(names)?))
            }
            (Value::Frame(df), Value::Mask(mask)) => {
                if mask.len() != df.height() {
                    return Err(err(format!(
                        "boolean mask length {} does not match frame height {}",
                        mask.len(),
                        df.height()
                    )));
                }
                let mask = BooleanChunked::from_slice("mask", &mask);
                Ok(Value::Frame(df.filter(&mask)?))
            }
            (
                Value::Grouped {
                    frame,
                    keys,
                    ..
                },
                Value::Str(column),
            ) => Ok(Value::Grouped {
                frame,
                keys,
                selected: Some(vec![column]),
            }),
            (
                Value::Grouped {
                    frame,
                    keys,
                    ..
                },
                Value::List(columns),
            ) => {
                let selected = columns
                    .iter()
                    .map(|c| {
                        c.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| err("column selection requires string names"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Grouped {
                    frame,
                    keys,
                    selected: Some(selected),
                })
            }
            (Value::List(items), Value::Int(i)) => {
                let index = if i < 0 { items.len() as i64 + i } else { i };
                items
                    .get(index as usize)
                    .cloned()
                    .ok_or_else(|| err(format!("list index {} out of range", i)))
            }
            (Value::Tuple(items), Value::Int(i)) => items
                .get(i as usize)
                .cloned()
                .ok_or_else(|| err(format!("tuple index {} out of range", i))),
            (base, index) => Err(err(format!(
                "cannot index {} with {}",
                base.type_name(),
                index.type_name()
            ))),
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], kwargs: &[(String, Expr)]) -> Result<Value> {
        let args = args
            .iter()
            .map(|a| self.eval(a))
            .collect::<Result<Vec<_>>>()?;
        let kwargs = kwargs
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.eval(v)?)))
            .collect::<Result<Vec<_>>>()?;

        match callee {
            Expr::Name(name) => self.builtin_call(name, &args),
            Expr::Attr { base, name } => {
                // plotly figures mutate in place through their binding
                if let Expr::Name(var) = &**base {
                    if matches!(self.ns.get(var), Some(Value::Interactive(_))) {
                        return self.interactive_method(var, name, &args, &kwargs);
                    }
                }
                let receiver = self.eval(base)?;
                self.method_call(receiver, name, &args, &kwargs)
            }
            other => {
                let value = self.eval(other)?;
                Err(err(format!("{} is not callable", value.type_name())))
            }
        }
    }

    fn builtin_call(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        match name {
            "print" => {
                let line = args
                    .iter()
                    .map(Value::display)
                    .collect::<Vec<_>>()
                    .join(" ");
                self.ns.prints.push(line);
                Ok(Value::None)
            }
            "len" => {
                let length = match args.first() {
                    Some(Value::Frame(df)) => df.height(),
                    Some(Value::Column(s)) => s.len(),
                    Some(Value::List(items)) => items.len(),
                    Some(Value::Tuple(items)) => items.len(),
                    Some(Value::Str(s)) => s.chars().count(),
                    other => {
                        return Err(err(format!(
                            "len() does not support {}",
                            other.map(|v| v.type_name()).unwrap_or("no arguments")
                        )))
                    }
                };
                Ok(Value::Int(length as i64))
            }
            "round" => {
                let value = args
                    .first()
                    .and_then(Value::as_f64)
                    .ok_or_else(|| err("round() requires a number"))?;
                let digits = args.get(1).and_then(Value::as_f64).unwrap_or(0.0) as i32;
                let factor = 10f64.powi(digits);
                Ok(Value::Float((value * factor).round() / factor))
            }
            "str" => Ok(Value::Str(
                args.first().map(Value::display).unwrap_or_default(),
            )),
            "float" => {
                let value = match args.first() {
                    Some(Value::Str(s)) => s
                        .trim()
                        .parse::<f64>()
                        .map_err(|_| err(format!("could not convert '{}' to float", s)))?,
                    Some(other) => other
                        .as_f64()
                        .ok_or_else(|| err(format!("cannot convert {} to float", other.type_name())))?,
                    None => return Err(err("float() requires an argument")),
                };
                Ok(Value::Float(value))
            }
            "int" => {
                let value = match args.first() {
                    Some(Value::Str(s)) => s
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| err(format!("could not convert '{}' to int", s)))?,
                    Some(other) => other
                        .as_f64()
                        .ok_or_else(|| err(format!("cannot convert {} to int", other.type_name())))?
                        as i64,
                    None => return Err(err("int() requires an argument")),
                };
                Ok(Value::Int(value))
            }
            other => {
                if self.ns.get(other).is_some() {
                    Err(err(format!("'{}' is not callable", other)))
                } else {
                    Err(err(format!("name '{}' is not defined", other)))
                }
            }
        }
    }

    fn method_call(
        &mut self,
        receiver: Value,
        method: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Result<Value> {
        match receiver {
            Value::Module(module) => self.module_call(module, method, args, kwargs),
            Value::Frame(df) => self.frame_method(df, method, args, kwargs),
            Value::Column(series) => column_method(&series, method, args),
            Value::DtAccessor(series) => match method {
                "strftime" => {
                    let format = args
                        .first()
                        .and_then(Value::as_str)
                        .ok_or_else(|| err("strftime requires a format string"))?;
                    Ok(Value::Column(dt_format(&series, format)?))
                }
                "to_period" => {
                    let format = match args.first().and_then(Value::as_str) {
                        Some("M") => "%Y-%m",
                        Some("Y") => "%Y",
                        Some("D") => "%Y-%m-%d",
                        other => {
                            return Err(err(format!(
                                "unsupported period frequency {:?}",
                                other.unwrap_or("")
                            )))
                        }
                    };
                    Ok(Value::Column(dt_format(&series, format)?))
                }
                other => Err(err(format!("datetime accessor has no method '{}'", other))),
            },
            Value::Grouped {
                frame,
                keys,
                selected,
            } => {
                let how = match method {
                    "sum" | "mean" | "count" | "min" | "max" => method,
                    "agg" | "aggregate" => args
                        .first()
                        .and_then(Value::as_str)
                        .ok_or_else(|| err("agg requires an aggregation name"))?,
                    other => return Err(err(format!("grouped frame has no method '{}'", other))),
                };
                Ok(Value::Frame(aggregate(&frame, &keys, selected.as_deref(), how)?))
            }
            Value::Figure(handle) => self.figure_method(handle, method, args),
            Value::Axes(handle) => self.axes_method(handle, method, args, kwargs),
            Value::Declarative(chart) => declarative_method(chart, method, args, kwargs),
            Value::Interactive(mut figure) => {
                // detached figure (mid-chain), mutate the local copy
                interactive_method_impl(&mut figure, method, args, kwargs)?;
                Ok(Value::Interactive(figure))
            }
            other => Err(err(format!(
                "'{}' object has no method '{}'",
                other.type_name(),
                method
            ))),
        }
    }

    fn interactive_method(
        &mut self,
        var: &str,
        method: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Result<Value> {
        let mut figure = match self.ns.get(var) {
            Some(Value::Interactive(figure)) => figure.clone(),
            _ => return Err(err(format!("name '{}' is not defined", var))),
        };
        interactive_method_impl(&mut figure, method, args, kwargs)?;
        self.ns.set(var, Value::Interactive(figure.clone()));
        Ok(Value::Interactive(figure))
    }

    fn module_call(
        &mut self,
        module: Module,
        method: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Result<Value> {
        match module {
            Module::Pandas => self.pandas_call(method, args, kwargs),
            Module::Pyplot | Module::Matplotlib => self.pyplot_call(method, args, kwargs),
            Module::PlotlyExpress => self.express_call(method, args, kwargs),
            Module::PlotlyGraphObjects => go_call(method, args, kwargs),
            Module::Altair => altair_call(method, args, kwargs),
            Module::Seaborn => self.seaborn_call(method, args, kwargs),
            Module::Numpy => Err(err(format!(
                "numpy.{} is not available in the execution sandbox",
                method
            ))),
            Module::Datetime => match method {
                "now" | "today" => {
                    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
                    Ok(Value::Str(now))
                }
                "strptime" => Err(err(
                    "datetime.strptime is not available; use pd.to_datetime instead",
                )),
                other => Err(err(format!("datetime has no method '{}'", other))),
            },
        }
    }

    fn pandas_call(
        &mut self,
        method: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Result<Value> {
        match method {
            "to_datetime" => {
                let series = match args.first() {
                    Some(Value::Column(s)) => s.clone(),
                    Some(other) => {
                        return Err(err(format!(
                            "pd.to_datetime expects a column, got {}",
                            other.type_name()
                        )))
                    }
                    None => return Err(err("pd.to_datetime requires an argument")),
                };
                let format = kwarg(kwargs, "format").and_then(Value::as_str);
                let dayfirst = matches!(kwarg(kwargs, "dayfirst"), Some(Value::Bool(true)));
                let coerce = kwarg(kwargs, "errors").and_then(Value::as_str) == Some("coerce");
                let parsed = parse_datetime_series(&series, format, dayfirst, coerce)?;
                Ok(Value::Column(parsed))
            }
            "read_csv" | "read_excel" => Err(err(
                "file loading is not available in the execution sandbox; uploaded tables are provided in dataframes",
            )),
            "DataFrame" => {
                let object = match args.first() {
                    Some(Value::Trace(serde_json::Value::Object(map))) => map.clone(),
                    _ => return Err(err("pd.DataFrame expects a dict of columns")),
                };
                let mut columns = Vec::new();
                for (name, values) in &object {
                    let values = values
                        .as_array()
                        .ok_or_else(|| err("pd.DataFrame column values must be lists"))?;
                    columns.push(json_array_to_series(name, values)?);
                }
                Ok(Value::Frame(DataFrame::new(columns)?))
            }
            other => Err(err(format!("pandas has no supported method '{}'", other))),
        }
    }

    fn pyplot_call(
        &mut self,
        method: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Result<Value> {
        match method {
            "figure" => {
                let handle = self.ns.figures.new_figure();
                Ok(Value::Figure(handle))
            }
            "subplots" => {
                let handle = self.ns.figures.new_figure();
                Ok(Value::Tuple(vec![Value::Figure(handle), Value::Axes(handle)]))
            }
            "bar" | "plot" | "scatter" => {
                let handle = self.ns.figures.current_or_new();
                self.draw_series(handle, method, args)
            }
            "title" | "suptitle" => {
                let handle = self.ns.figures.current_or_new();
                self.set_figure_text(handle, "title", args)
            }
            "xlabel" => {
                let handle = self.ns.figures.current_or_new();
                self.set_figure_text(handle, "xlabel", args)
            }
            "ylabel" => {
                let handle = self.ns.figures.current_or_new();
                self.set_figure_text(handle, "ylabel", args)
            }
            "close" => {
                match args.first() {
                    Some(Value::Str(s)) if s == "all" => self.ns.figures.close_all(),
                    Some(Value::Figure(handle)) => self.ns.figures.close(*handle),
                    _ => {
                        let handle = self.ns.figures.current_or_new();
                        self.ns.figures.close(handle);
                    }
                }
                Ok(Value::None)
            }
            // presentation-only calls have no effect on the rendered artifact
            "show" | "tight_layout" | "legend" | "grid" | "xticks" | "yticks" | "savefig"
            | "use" | "style" => {
                let _ = kwargs;
                Ok(Value::None)
            }
            other => Err(err(format!(
                "matplotlib.pyplot has no supported method '{}'",
                other
            ))),
        }
    }

    fn draw_series(&mut self, handle: usize, method: &str, args: &[Value]) -> Result<Value> {
        let kind = match method {
            "bar" | "barh" => SeriesKind::Bar,
            "scatter" => SeriesKind::Scatter,
            _ => {
                // marker-only style string means points, not a line
                match args.get(2).and_then(Value::as_str) {
                    Some(style) if style.contains('o') && !style.contains('-') => {
                        SeriesKind::Scatter
                    }
                    _ => SeriesKind::Line,
                }
            }
        };
        let labels = labels_from(args.first())?;
        let values = values_from(args.get(1))?;
        let figure = self
            .ns
            .figures
            .get_mut(handle)
            .ok_or_else(|| err("no such figure"))?;
        figure.series.push(PlotSeries {
            kind,
            labels,
            values,
        });
        Ok(Value::None)
    }

    fn set_figure_text(&mut self, handle: usize, field: &str, args: &[Value]) -> Result<Value> {
        let text = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| err(format!("{} requires a string", field)))?
            .to_string();
        let figure = self
            .ns
            .figures
            .get_mut(handle)
            .ok_or_else(|| err("no such figure"))?;
        match field {
            "title" => figure.title = Some(text),
            "xlabel" => figure.xlabel = Some(text),
            _ => figure.ylabel = Some(text),
        }
        Ok(Value::None)
    }

    fn figure_method(&mut self, handle: usize, method: &str, args: &[Value]) -> Result<Value> {
        match method {
            "suptitle" => self.set_figure_text(handle, "title", args),
            "add_subplot" => Ok(Value::Axes(handle)),
            "tight_layout" | "savefig" | "autofmt_xdate" | "show" => Ok(Value::None),
            other => Err(err(format!("'Figure' object has no method '{}'", other))),
        }
    }

    fn axes_method(
        &mut self,
        handle: usize,
        method: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Result<Value> {
        let _ = kwargs;
        match method {
            "bar" | "barh" | "plot" | "scatter" => self.draw_series(handle, method, args),
            "set_title" => self.set_figure_text(handle, "title", args),
            "set_xlabel" => self.set_figure_text(handle, "xlabel", args),
            "set_ylabel" => self.set_figure_text(handle, "ylabel", args),
            "legend" | "grid" | "tick_params" | "set_xticks" | "set_xticklabels"
            | "invert_yaxis" => Ok(Value::None),
            other => Err(err(format!("'Axes' object has no method '{}'", other))),
        }
    }

    fn express_call(
        &mut self,
        method: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Result<Value> {
        let trace_type = match method {
            "bar" => ("bar", None),
            "line" => ("scatter", Some("lines")),
            "scatter" => ("scatter", Some("markers")),
            other => {
                return Err(err(format!(
                    "plotly.express has no supported method '{}'",
                    other
                )))
            }
        };
        let df = match args.first().or_else(|| kwarg(kwargs, "data_frame")) {
            Some(Value::Frame(df)) => df.clone(),
            _ => return Err(err("plotly.express charts require a DataFrame")),
        };
        let x = kwarg(kwargs, "x")
            .and_then(Value::as_str)
            .ok_or_else(|| err("plotly.express charts require x="))?;
        let y = kwarg(kwargs, "y")
            .and_then(Value::as_str)
            .ok_or_else(|| err("plotly.express charts require y="))?;
        let labels = series_labels(df.column(x)?);
        let values = series_values(df.column(y)?)?;

        let mut figure = InteractiveFigure::new();
        match kwarg(kwargs, "color").and_then(Value::as_str) {
            Some(color) => {
                let groups = series_labels(df.column(color)?);
                let mut seen: Vec<String> = Vec::new();
                for group in &groups {
                    if !seen.contains(group) {
                        seen.push(group.clone());
                    }
                }
                for group in seen {
                    let mut xs = Vec::new();
                    let mut ys = Vec::new();
                    for (i, g) in groups.iter().enumerate() {
                        if g == &group {
                            xs.push(labels[i].clone());
                            ys.push(values[i]);
                        }
                    }
                    figure.push_trace(trace_json(trace_type, &xs, &ys, Some(&group)));
                }
            }
            None => figure.push_trace(trace_json(trace_type, &labels, &values, None)),
        }
        if let Some(title) = kwarg(kwargs, "title").and_then(Value::as_str) {
            figure.set_layout("title", json!(title));
        }
        figure.set_layout("xaxis", json!({ "title": x }));
        figure.set_layout("yaxis", json!({ "title": y }));
        Ok(Value::Interactive(figure))
    }

    fn seaborn_call(
        &mut self,
        method: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Result<Value> {
        match method {
            "barplot" | "lineplot" | "scatterplot" => {
                let df = match kwarg(kwargs, "data").or_else(|| args.first()) {
                    Some(Value::Frame(df)) => df.clone(),
                    _ => return Err(err("seaborn plots require data=")),
                };
                let x = kwarg(kwargs, "x")
                    .and_then(Value::as_str)
                    .ok_or_else(|| err("seaborn plots require x="))?;
                let y = kwarg(kwargs, "y")
                    .and_then(Value::as_str)
                    .ok_or_else(|| err("seaborn plots require y="))?;
                let kind = match method {
                    "barplot" => SeriesKind::Bar,
                    "lineplot" => SeriesKind::Line,
                    _ => SeriesKind::Scatter,
                };
                let labels = series_labels(df.column(x)?);
                let values = series_values(df.column(y)?)?;
                let handle = self.ns.figures.current_or_new();
                let figure = self
                    .ns
                    .figures
                    .get_mut(handle)
                    .ok_or_else(|| err("no such figure"))?;
                figure.series.push(PlotSeries {
                    kind,
                    labels,
                    values,
                });
                if figure.xlabel.is_none() {
                    figure.xlabel = Some(x.to_string());
                }
                if figure.ylabel.is_none() {
                    figure.ylabel = Some(y.to_string());
                }
                Ok(Value::Axes(handle))
            }
            "set_style" | "set_palette" | "set_theme" | "despine" => Ok(Value::None),
            other => Err(err(format!("seaborn has no supported method '{}'", other))),
        }
    }

    fn frame_method(
        &mut self,
        df: DataFrame,
        method: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Result<Value> {
        match method {
            "groupby" | "group_by" => {
                let keys = match args.first() {
                    Some(Value::Str(key)) => vec![key.clone()],
                    Some(Value::List(keys)) => keys
                        .iter()
                        .map(|k| {
                            k.as_str()
                                .map(str::to_string)
                                .ok_or_else(|| err("groupby keys must be strings"))
                        })
                        .collect::<Result<Vec<_>>>()?,
                    _ => return Err(err("groupby requires a column name")),
                };
                for key in &keys {
                    df.column(key)?;
                }
                Ok(Value::Grouped {
                    frame: df,
                    keys,
                    selected: None,
                })
            }
            "sort_values" => {
                let by = match args.first().or_else(|| kwarg(kwargs, "by")) {
                    Some(Value::Str(name)) => vec![name.clone()],
                    Some(Value::List(names)) => names
                        .iter()
                        .map(|n| {
                            n.as_str()
                                .map(str::to_string)
                                .ok_or_else(|| err("sort_values columns must be strings"))
                        })
                        .collect::<Result<Vec<_>>>()?,
                    _ => return Err(err("sort_values requires a column name")),
                };
                let ascending = !matches!(kwarg(kwargs, "ascending"), Some(Value::Bool(false)));
                let by: Vec<&str> = by.iter().map(String::as_str).collect();
                let sorted = df.sort(
                    by,
                    SortMultipleOptions::default().with_order_descending(!ascending),
                )?;
                Ok(Value::Frame(sorted))
            }
            "head" => {
                let n = args.first().and_then(Value::as_f64).unwrap_or(5.0) as usize;
                Ok(Value::Frame(df.head(Some(n))))
            }
            "tail" => {
                let n = args.first().and_then(Value::as_f64).unwrap_or(5.0) as usize;
                Ok(Value::Frame(df.tail(Some(n))))
            }
            "copy" | "reset_index" => Ok(Value::Frame(df)),
            "rename" => {
                let mut df = df;
                if let Some(Value::Trace(serde_json::Value::Object(map))) = kwarg(kwargs, "columns")
                {
                    for (old, new) in map {
                        if let Some(new) = new.as_str() {
                            df.rename(old, new)?;
                        }
                    }
                }
                Ok(Value::Frame(df))
            }
            "to_string" => Ok(Value::Str(format!("{}", df))),
            other => Err(err(format!("'DataFrame' object has no method '{}'", other))),
        }
    }
}

fn module_for(path: &str) -> Option<Module> {
    match path {
        "pandas" => Some(Module::Pandas),
        "numpy" => Some(Module::Numpy),
        "matplotlib" => Some(Module::Matplotlib),
        "matplotlib.pyplot" => Some(Module::Pyplot),
        "plotly" | "plotly.express" => Some(Module::PlotlyExpress),
        "plotly.graph_objects" | "plotly.graph_objs" => Some(Module::PlotlyGraphObjects),
        "altair" => Some(Module::Altair),
        "seaborn" => Some(Module::Seaborn),
        "datetime" | "datetime.datetime" | "datetime.date" => Some(Module::Datetime),
        _ => None,
    }
}

fn kwarg<'a>(kwargs: &'a [(String, Value)], name: &str) -> Option<&'a Value> {
    kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

fn binary(op: &BinOp, left: Value, right: Value) -> Result<Value> {
    // column comparisons produce row masks for filtering
    if let Value::Column(series) = &left {
        match op {
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                return column_compare(series, op, &right)
            }
            _ => {
                if let Some(scalar) = right.as_f64() {
                    return column_arith(series, op, scalar);
                }
            }
        }
    }
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => match op {
            BinOp::Add => Ok(Value::Int(a + b)),
            BinOp::Sub => Ok(Value::Int(a - b)),
            BinOp::Mul => Ok(Value::Int(a * b)),
            BinOp::Div => {
                if b == 0 {
                    Err(err("division by zero"))
                } else {
                    Ok(Value::Float(a as f64 / b as f64))
                }
            }
            _ => compare_f64(op, a as f64, b as f64),
        },
        (Value::Str(a), Value::Str(b)) => match op {
            BinOp::Add => Ok(Value::Str(format!("{}{}", a, b))),
            BinOp::Eq => Ok(Value::Bool(a == b)),
            BinOp::Ne => Ok(Value::Bool(a != b)),
            _ => Err(err("unsupported string operation")),
        },
        (left, right) => {
            let (a, b) = match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(err(format!(
                        "unsupported operand types: {} and {}",
                        left.type_name(),
                        right.type_name()
                    )))
                }
            };
            match op {
                BinOp::Add => Ok(Value::Float(a + b)),
                BinOp::Sub => Ok(Value::Float(a - b)),
                BinOp::Mul => Ok(Value::Float(a * b)),
                BinOp::Div => Ok(Value::Float(a / b)),
                _ => compare_f64(op, a, b),
            }
        }
    }
}

fn compare_f64(op: &BinOp, a: f64, b: f64) -> Result<Value> {
    let result = match op {
        BinOp::Eq => a == b,
        BinOp::Ne => a != b,
        BinOp::Lt => a < b,
        BinOp::Le => a <= b,
        BinOp::Gt => a > b,
        BinOp::Ge => a >= b,
        _ => return Err(err("unsupported comparison")),
    };
    Ok(Value::Bool(result))
}

fn column_compare(series: &Series, op: &BinOp, right: &Value) -> Result<Value> {
    if let Some(text) = right.as_str() {
        let mask = match series.str() {
            Ok(ca) => ca
                .into_iter()
                .map(|v| {
                    let equal = v == Some(text);
                    match op {
                        BinOp::Eq => equal,
                        BinOp::Ne => !equal,
                        _ => false,
                    }
                })
                .collect(),
            Err(_) => vec![false; series.len()],
        };
        if !matches!(op, BinOp::Eq | BinOp::Ne) {
            return Err(err("string columns only support == and != comparisons"));
        }
        return Ok(Value::Mask(mask));
    }
    let scalar = right
        .as_f64()
        .ok_or_else(|| err(format!("cannot compare a column with {}", right.type_name())))?;
    let values = series_values(series)?;
    let mask = values
        .iter()
        .map(|v| match op {
            BinOp::Eq => *v == scalar,
            BinOp::Ne => *v != scalar,
            BinOp::Lt => *v < scalar,
            BinOp::Le => *v <= scalar,
            BinOp::Gt => *v > scalar,
            BinOp::Ge => *v >= scalar,
            _ => false,
        })
        .collect();
    Ok(Value::Mask(mask))
}

fn column_arith(series: &Series, op: &BinOp, scalar: f64) -> Result<Value> {
    let values = series_values(series)?;
    let out: Vec<f64> = values
        .iter()
        .map(|v| match op {
            BinOp::Add => v + scalar,
            BinOp::Sub => v - scalar,
            BinOp::Mul => v * scalar,
            _ => v / scalar,
        })
        .collect();
    Ok(Value::Column(Series::new(series.name(), out)))
}

fn column_method(series: &Series, method: &str, args: &[Value]) -> Result<Value> {
    match method {
        "sum" | "mean" | "min" | "max" => {
            let values: Vec<f64> = series_values(series)?
                .into_iter()
                .filter(|v| v.is_finite())
                .collect();
            if values.is_empty() {
                return Ok(Value::Float(f64::NAN));
            }
            let result = match method {
                "sum" => values.iter().sum(),
                "mean" => values.iter().sum::<f64>() / values.len() as f64,
                "min" => values.iter().cloned().fold(f64::INFINITY, f64::min),
                _ => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            };
            Ok(Value::Float(result))
        }
        "count" => Ok(Value::Int((series.len() - series.null_count()) as i64)),
        "nunique" => Ok(Value::Int(series.unique()?.len() as i64)),
        "unique" => Ok(Value::Column(series.unique()?)),
        "tolist" | "to_list" => {
            let labels = series_labels(series);
            match series_values(series) {
                Ok(values) if !matches!(series.dtype(), DataType::String) => Ok(Value::List(
                    values.into_iter().map(Value::Float).collect(),
                )),
                _ => Ok(Value::List(labels.into_iter().map(Value::Str).collect())),
            }
        }
        "astype" => {
            let target = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| err("astype requires a type name"))?;
            let dtype = match target {
                "str" | "string" => DataType::String,
                "int" | "int64" => DataType::Int64,
                "float" | "float64" => DataType::Float64,
                other => return Err(err(format!("unsupported astype target '{}'", other))),
            };
            Ok(Value::Column(series.cast(&dtype)?))
        }
        "round" => {
            let digits = args.first().and_then(Value::as_f64).unwrap_or(0.0) as i32;
            let factor = 10f64.powi(digits);
            let values: Vec<f64> = series_values(series)?
                .into_iter()
                .map(|v| (v * factor).round() / factor)
                .collect();
            Ok(Value::Column(Series::new(series.name(), values)))
        }
        other => Err(err(format!("'Series' object has no method '{}'", other))),
    }
}

fn aggregate(
    frame: &DataFrame,
    keys: &[String],
    selected: Option<&[String]>,
    how: &str,
) -> Result<DataFrame> {
    let value_columns: Vec<String> = match selected {
        Some(columns) => columns.to_vec(),
        None => frame
            .get_column_names()
            .iter()
            .filter(|name| !keys.contains(&name.to_string()))
            .map(|name| name.to_string())
            .collect(),
    };
    if value_columns.is_empty() {
        return Err(err("no columns to aggregate"));
    }
    let agg_exprs: Vec<polars::lazy::dsl::Expr> = value_columns
        .iter()
        .map(|name| {
            let column = col(name);
            match how {
                "sum" => Ok(column.sum()),
                "mean" => Ok(column.mean()),
                "count" => Ok(column.count()),
                "min" => Ok(column.min()),
                "max" => Ok(column.max()),
                other => Err(err(format!("unsupported aggregation '{}'", other))),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    let key_exprs: Vec<polars::lazy::dsl::Expr> = keys.iter().map(|k| col(k)).collect();
    let grouped = frame
        .clone()
        .lazy()
        .group_by(key_exprs)
        .agg(agg_exprs)
        .collect()?;
    // group order is nondeterministic, sort by keys for stable output
    let by: Vec<&str> = keys.iter().map(String::as_str).collect();
    Ok(grouped.sort(by, SortMultipleOptions::default())?)
}

fn dt_component(series: &Series, component: &str) -> Result<Series> {
    let name = series.name().to_string();
    let df = DataFrame::new(vec![series.clone()])?;
    let expr = match component {
        "year" => col(&name).dt().year(),
        "month" => col(&name).dt().month(),
        _ => col(&name).dt().day(),
    };
    let out = df.lazy().select([expr]).collect()?;
    Ok(out.column(&name)?.clone())
}

fn dt_format(series: &Series, format: &str) -> Result<Series> {
    let name = series.name().to_string();
    let df = DataFrame::new(vec![series.clone()])?;
    let out = df
        .lazy()
        .select([col(&name).dt().to_string(format)])
        .collect()?;
    Ok(out.column(&name)?.clone())
}

fn labels_from(value: Option<&Value>) -> Result<Vec<String>> {
    match value {
        Some(Value::Column(series)) => Ok(series_labels(series)),
        Some(Value::List(items)) => Ok(items.iter().map(Value::display).collect()),
        Some(other) => Err(err(format!(
            "plot x values must be a column or list, got {}",
            other.type_name()
        ))),
        None => Err(err("plot call requires x and y values")),
    }
}

fn values_from(value: Option<&Value>) -> Result<Vec<f64>> {
    match value {
        Some(Value::Column(series)) => series_values(series),
        Some(Value::List(items)) => Ok(items
            .iter()
            .map(|v| v.as_f64().unwrap_or(f64::NAN))
            .collect()),
        Some(other) => Err(err(format!(
            "plot y values must be a column or list, got {}",
            other.type_name()
        ))),
        None => Err(err("plot call requires x and y values")),
    }
}

fn list_to_series(name: &str, items: &[Value]) -> Result<Series> {
    let all_strings = items.iter().all(|v| matches!(v, Value::Str(_)));
    if all_strings {
        let values: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
        return Ok(Series::new(name, values));
    }
    let values = items
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| err(format!("cannot build a column from {}", v.type_name())))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Series::new(name, values))
}

fn json_array_to_series(name: &str, values: &[serde_json::Value]) -> Result<Series> {
    let all_strings = values.iter().all(|v| v.is_string());
    if all_strings {
        let strings: Vec<&str> = values.iter().filter_map(|v| v.as_str()).collect();
        return Ok(Series::new(name, strings));
    }
    let numbers = values
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| err("pd.DataFrame columns must be uniform strings or numbers"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Series::new(name, numbers))
}

fn value_to_json(value: &Value) -> Result<serde_json::Value> {
    match value {
        Value::Str(s) => Ok(json!(s)),
        Value::Int(v) => Ok(json!(v)),
        Value::Float(v) => {
            if v.is_finite() {
                Ok(json!(v))
            } else {
                Ok(serde_json::Value::Null)
            }
        }
        Value::Bool(b) => Ok(json!(b)),
        Value::None => Ok(serde_json::Value::Null),
        Value::List(items) | Value::Tuple(items) => {
            let array = items.iter().map(value_to_json).collect::<Result<Vec<_>>>()?;
            Ok(serde_json::Value::Array(array))
        }
        Value::Column(series) => Ok(serde_json::Value::Array(series_to_json(series))),
        Value::Trace(json) => Ok(json.clone()),
        Value::Mask(mask) => Ok(json!(mask)),
        other => Err(err(format!("cannot serialize {}", other.type_name()))),
    }
}

fn trace_json(kind: (&str, Option<&str>), x: &[String], y: &[f64], name: Option<&str>) -> serde_json::Value {
    let y: Vec<serde_json::Value> = y
        .iter()
        .map(|v| {
            if v.is_finite() {
                json!(v)
            } else {
                serde_json::Value::Null
            }
        })
        .collect();
    let mut trace = serde_json::Map::new();
    trace.insert("type".to_string(), json!(kind.0));
    if let Some(mode) = kind.1 {
        trace.insert("mode".to_string(), json!(mode));
    }
    trace.insert("x".to_string(), json!(x));
    trace.insert("y".to_string(), serde_json::Value::Array(y));
    if let Some(name) = name {
        trace.insert("name".to_string(), json!(name));
    }
    serde_json::Value::Object(trace)
}

fn go_call(method: &str, args: &[Value], kwargs: &[(String, Value)]) -> Result<Value> {
    match method {
        "Bar" | "Scatter" => {
            let mut trace = serde_json::Map::new();
            if method == "Bar" {
                trace.insert("type".to_string(), json!("bar"));
            } else {
                trace.insert("type".to_string(), json!("scatter"));
                let mode = kwarg(kwargs, "mode")
                    .and_then(Value::as_str)
                    .unwrap_or("lines");
                trace.insert("mode".to_string(), json!(mode));
            }
            for key in ["x", "y", "name"] {
                if let Some(value) = kwarg(kwargs, key) {
                    trace.insert(key.to_string(), value_to_json(value)?);
                }
            }
            Ok(Value::Trace(serde_json::Value::Object(trace)))
        }
        "Figure" => {
            let mut figure = InteractiveFigure::new();
            let data = kwarg(kwargs, "data").or_else(|| args.first());
            match data {
                Some(Value::List(items)) => {
                    for item in items {
                        match item {
                            Value::Trace(trace) => figure.push_trace(trace.clone()),
                            other => {
                                return Err(err(format!(
                                    "go.Figure data must be traces, got {}",
                                    other.type_name()
                                )))
                            }
                        }
                    }
                }
                Some(Value::Trace(trace)) => figure.push_trace(trace.clone()),
                Some(other) => {
                    return Err(err(format!(
                        "go.Figure data must be traces, got {}",
                        other.type_name()
                    )))
                }
                None => {}
            }
            Ok(Value::Interactive(figure))
        }
        other => Err(err(format!(
            "plotly.graph_objects has no supported method '{}'",
            other
        ))),
    }
}

fn interactive_method_impl(
    figure: &mut InteractiveFigure,
    method: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Result<()> {
    match method {
        "update_layout" => {
            for (key, value) in kwargs {
                let json = value_to_json(value)?;
                match key.split_once('_') {
                    // plotly "magic underscore": xaxis_title -> {xaxis: {title}}
                    Some((outer, inner)) if outer == "xaxis" || outer == "yaxis" => {
                        figure.set_layout(outer, json!({ inner: json }));
                    }
                    _ => figure.set_layout(key, json),
                }
            }
            Ok(())
        }
        "add_trace" => match args.first() {
            Some(Value::Trace(trace)) => {
                figure.push_trace(trace.clone());
                Ok(())
            }
            _ => Err(err("add_trace requires a trace")),
        },
        "show" | "update_traces" | "update_xaxes" | "update_yaxes" => Ok(()),
        other => Err(err(format!(
            "plotly figure has no supported method '{}'",
            other
        ))),
    }
}

fn altair_call(method: &str, args: &[Value], kwargs: &[(String, Value)]) -> Result<Value> {
    match method {
        "Chart" => match args.first() {
            Some(Value::Frame(df)) => Ok(Value::Declarative(DeclarativeChart::new(df))),
            _ => Err(err("alt.Chart requires a DataFrame")),
        },
        // channel helpers reduce to their shorthand
        "X" | "Y" | "Color" | "Tooltip" => {
            let _ = kwargs;
            match args.first() {
                Some(Value::Str(shorthand)) => Ok(Value::Str(shorthand.clone())),
                _ => Err(err(format!("alt.{} requires a field shorthand", method))),
            }
        }
        other => Err(err(format!("altair has no supported method '{}'", other))),
    }
}

fn declarative_method(
    chart: DeclarativeChart,
    method: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Result<Value> {
    let _ = args;
    match method {
        "mark_bar" => Ok(Value::Declarative(chart.with_mark("bar"))),
        "mark_line" => Ok(Value::Declarative(chart.with_mark("line"))),
        "mark_point" | "mark_circle" => Ok(Value::Declarative(chart.with_mark("point"))),
        "mark_area" => Ok(Value::Declarative(chart.with_mark("area"))),
        "encode" => {
            let mut chart = chart;
            for (channel, value) in kwargs {
                let shorthand = value
                    .as_str()
                    .ok_or_else(|| err("encode channels require field shorthands"))?;
                chart.encode_channel(channel, shorthand);
            }
            Ok(Value::Declarative(chart))
        }
        "properties" => {
            let mut chart = chart;
            if let Some(title) = kwarg(kwargs, "title").and_then(Value::as_str) {
                chart.title = Some(title.to_string());
            }
            if let Some(width) = kwarg(kwargs, "width").and_then(Value::as_f64) {
                chart.width = Some(width as u32);
            }
            if let Some(height) = kwarg(kwargs, "height").and_then(Value::as_f64) {
                chart.height = Some(height as u32);
            }
            Ok(Value::Declarative(chart))
        }
        "interactive" => Ok(Value::Declarative(chart)),
        other => Err(err(format!("altair chart has no method '{}'", other))),
    }
}
