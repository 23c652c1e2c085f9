pub mod ql;
pub mod util;
