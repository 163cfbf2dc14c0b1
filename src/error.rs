use std::fmt;

macro_rules! err {
    ($base:ident, $msg:literal) => {
        $crate::error::ConvertError::with_context($base, $msg.to_string())
    };
    ($base:ident, $fmtstr:literal, $($args:tt)*) => {
        $crate::error::ConvertError::with_context($base, format!($fmtstr, $($args)*))
    };
    ($msg:literal) => {
        $crate::error::ConvertError::new($msg)
    };
    ($fmtstr:literal, $($args:tt)*) => {
        $crate::error::ConvertError::new(&format!($fmtstr, $($args)*))
    };
}

macro_rules! fail {
    ($msg:literal) => {
        return Err($crate::error::ConvertError::new($msg))
    };
    ($fmtstr:literal, $($args:tt)*) => {
        return Err($crate::error::ConvertError::new(&format!($fmtstr, $($args)*)))
    };
}

/// Error raised while translating a method body.
///
/// Carries the step of the translation that gave up (`lift`, a pipeline
/// pass, `workaround` or `lower`) and the locations pushed while the error
/// travels outwards, innermost first. Renders as
/// `msg for ctx1 of ctx2 (in stage)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertError
{
    msg: String,
    stage: Option<&'static str>,
    contexts: Vec<String>,
}

impl ConvertError
{
    pub fn new(msg: &str) -> Self
    {
        ConvertError {
            msg: msg.to_string(),
            stage: None,
            contexts: Vec::new(),
        }
    }

    pub fn with_context(mut base: ConvertError, context: String) -> Self
    {
        base.contexts.push(context);
        base
    }

    /// Records the step that failed; an inner stage is kept.
    pub fn in_stage(mut self, stage: &'static str) -> Self
    {
        self.stage.get_or_insert(stage);
        self
    }

    pub fn stage(&self) -> Option<&'static str>
    {
        self.stage
    }
}

impl fmt::Display for ConvertError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.msg)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        if let Some(stage) = self.stage
        {
            write!(f, " (in {})", stage)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConvertError {}
