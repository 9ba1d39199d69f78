mod common;

mod controller;
mod eligibility;
