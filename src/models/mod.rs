pub mod outcome;
pub mod verification;
pub mod work_item;
