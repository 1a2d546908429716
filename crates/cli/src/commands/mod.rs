pub(crate) mod backup;
pub(crate) mod copy;
pub(crate) mod migrate;
pub(crate) mod run;
pub(crate) mod status;
