pub mod feature;
pub mod run;
pub mod worker;
