//! Request codec and RESP parser tests

mod resp_parser_tests;
