pub mod deploy;

pub type CmdResult<T> = deedeeploy::Result<(T, i32)>;
