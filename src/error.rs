use thiserror::Error;

#[derive(Debug, Error)]
pub enum TsqlError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("not support non-query statement")]
    NotSupportNonQueryStatement,

    #[error("statement has not been built")]
    NotBuilt,

    #[error("not support source '{0}'")]
    UnsupportedSource(String),

    #[error("{0}")]
    Function(String),

    #[error("{0}")]
    Compile(String),

    #[error("{0}")]
    Eval(String),

    #[error("number divide by zero")]
    DivideByZero,

    #[error("decode error: {0}")]
    Decode(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = TsqlError> = std::result::Result<T, E>;

impl TsqlError {
    pub fn function(msg: impl Into<String>) -> Self {
        TsqlError::Function(msg.into())
    }

    pub fn compile(msg: impl Into<String>) -> Self {
        TsqlError::Compile(msg.into())
    }

    pub fn eval(msg: impl Into<String>) -> Self {
        TsqlError::Eval(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        TsqlError::Decode(msg.into())
    }
}

/// Fails unless `got == num`.
pub fn must_args_num(name: &str, got: usize, num: usize) -> Result<()> {
    if got != num {
        return Err(TsqlError::Function(format!(
            "function '{name}' expect {num} args, but got {got} args"
        )));
    }
    Ok(())
}

/// Fails unless `got >= num`.
pub fn must_args_min_num(name: &str, got: usize, num: usize) -> Result<()> {
    if got < num {
        return Err(TsqlError::Function(format!("function '{name}' must has {num} args")));
    }
    Ok(())
}
