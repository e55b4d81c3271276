use serde::{Deserialize, Serialize};

/// A single `param=value` pair handed to a tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub param: String,
    pub value: String,
}

impl Param {
    pub fn new(param: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            value: value.into(),
        }
    }

    /// Render as a command line argument
    pub fn as_arg(&self) -> String {
        format!("{}={}", self.param, self.value)
    }
}

/// How chatty a tool is allowed to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    #[default]
    Normal,
    Quiet,
    Superquiet,
}

impl Verbosity {
    pub fn as_flag(&self) -> Option<&'static str> {
        match self {
            Verbosity::Normal => None,
            Verbosity::Quiet => Some("--q"),
            Verbosity::Superquiet => Some("--qq"),
        }
    }
}

/// One tool invocation inside a process chain.
///
/// Built with the consuming `with`-style methods below and never mutated
/// afterwards; the chain that declares it owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StepDoc", into = "StepDoc")]
pub struct Step {
    id: String,
    tool: String,
    inputs: Vec<Param>,
    outputs: Vec<Param>,
    flags: String,
    verbosity: Verbosity,
    exports: Option<String>,
}

impl Step {
    pub fn new(id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            inputs: vec![],
            outputs: vec![],
            flags: String::new(),
            verbosity: Verbosity::Normal,
            exports: None,
        }
    }

    pub fn input(mut self, param: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.push(Param::new(param, value));
        self
    }

    pub fn output(mut self, param: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.push(Param::new(param, value));
        self
    }

    pub fn flags(mut self, flags: impl Into<String>) -> Self {
        self.flags = flags.into();
        self
    }

    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn quiet(self) -> Self {
        self.verbosity(Verbosity::Quiet)
    }

    pub fn superquiet(self) -> Self {
        self.verbosity(Verbosity::Superquiet)
    }

    /// Register this step's captured stdout under a logical output name
    pub fn exports(mut self, name: impl Into<String>) -> Self {
        self.exports = Some(name.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn inputs(&self) -> &[Param] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Param] {
        &self.outputs
    }

    pub fn flag_letters(&self) -> &str {
        &self.flags
    }

    pub fn verbosity_level(&self) -> Verbosity {
        self.verbosity
    }

    pub fn exported_as(&self) -> Option<&str> {
        self.exports.as_deref()
    }

    /// Value of an input parameter, if declared
    pub fn input_value(&self, param: &str) -> Option<&str> {
        self.inputs
            .iter()
            .find(|p| p.param == param)
            .map(|p| p.value.as_str())
    }

    /// All parameters, inputs first, in declaration order
    pub fn params(&self) -> impl Iterator<Item = &Param> {
        self.inputs.iter().chain(self.outputs.iter())
    }

    /// Full argument vector for the tool, without the tool name itself
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = self.params().map(Param::as_arg).collect();
        if !self.flags.is_empty() {
            args.push(format!("-{}", self.flags));
        }
        if let Some(flag) = self.verbosity.as_flag() {
            args.push(flag.to_string());
        }
        args
    }
}

/// Wire shape of a step: `module` instead of `tool`, verbosity as two booleans
#[derive(Serialize, Deserialize)]
struct StepDoc {
    id: String,
    module: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    inputs: Vec<Param>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    outputs: Vec<Param>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    flags: String,
    #[serde(default, skip_serializing_if = "is_false")]
    quiet: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    superquiet: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exports: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl From<StepDoc> for Step {
    fn from(doc: StepDoc) -> Self {
        let verbosity = if doc.superquiet {
            Verbosity::Superquiet
        } else if doc.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        };

        Self {
            id: doc.id,
            tool: doc.module,
            inputs: doc.inputs,
            outputs: doc.outputs,
            flags: doc.flags,
            verbosity,
            exports: doc.exports,
        }
    }
}

impl From<Step> for StepDoc {
    fn from(step: Step) -> Self {
        Self {
            id: step.id,
            module: step.tool,
            inputs: step.inputs,
            outputs: step.outputs,
            flags: step.flags,
            quiet: step.verbosity == Verbosity::Quiet,
            superquiet: step.verbosity == Verbosity::Superquiet,
            exports: step.exports,
        }
    }
}
