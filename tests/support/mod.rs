#![allow(dead_code)]

pub mod gestures_env;
pub mod images;
pub mod scripted;
