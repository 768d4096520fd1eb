mod common;
mod dosing;
