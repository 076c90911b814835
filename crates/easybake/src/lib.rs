#![doc = include_str!("../../../README.md")]

mod builder;
mod collate;
mod counters;
mod css;
mod decl;
pub mod dom;
mod error;
mod exec;
mod expr;
pub mod html;
mod oven;
mod state;
mod tokens;
mod value;

pub use crate::{
    error::{BakeError, BakeResult},
    oven::Oven,
};
