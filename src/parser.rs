use std::{borrow::BorrowMut, path::PathBuf};

use anyhow::{Context, Result};
use pest::Parser as _;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "insight.pest"]
struct Parser;

type Pair<'a> = pest::iterators::Pair<'a, Rule>;
type Pairs<'a> = pest::iterators::Pairs<'a, Rule>;

/// A line typed into the shell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Add {
        id: String,
        kind: String,
        path: PathBuf,
    },
    Remove {
        id: String,
    },
    List,
    Query(String),
    Help,
    Exit,
}

pub fn parse_command(line: &str) -> Result<Command> {
    let command = Parser::parse(Rule::command, line)
        .context("Failed to parse command")?
        .next()
        .context("Empty command")?;

    Ok(Command::from(expect_any_rule(command.into_inner())))
}

fn expect_any_rule<'a, P: BorrowMut<Pairs<'a>>>(mut pairs: P) -> Pair<'a> {
    pairs.borrow_mut().next().expect("missing pair")
}

fn expect_next_rule<'a, P: BorrowMut<Pairs<'a>>>(pairs: P, rule: Rule) -> Pair<'a> {
    let pair = expect_any_rule(pairs);
    assert_eq!(pair.as_rule(), rule);
    pair
}

fn convert_argument(pair: Pair) -> String {
    match pair.as_rule() {
        Rule::word => pair.as_str().to_string(),
        Rule::string_literal => expect_next_rule(pair.into_inner(), Rule::string_interior)
            .as_str()
            .to_string(),
        _ => unreachable!(),
    }
}

fn expect_argument<'a, P: BorrowMut<Pairs<'a>>>(pairs: P) -> String {
    convert_argument(expect_any_rule(pairs))
}

impl From<Pair<'_>> for Command {
    fn from(pair: Pair<'_>) -> Self {
        let rule = pair.as_rule();
        let mut pairs = pair.into_inner();
        // Every command starts with its keyword.
        pairs.next();

        match rule {
            Rule::add_command => Command::Add {
                id: expect_argument(&mut pairs),
                kind: expect_argument(&mut pairs),
                path: PathBuf::from(expect_argument(&mut pairs)),
            },

            Rule::remove_command => Command::Remove {
                id: expect_argument(&mut pairs),
            },

            Rule::list_command => Command::List,

            Rule::query_command => {
                Command::Query(expect_next_rule(&mut pairs, Rule::json_text).as_str().trim().to_string())
            }

            Rule::help_command => Command::Help,

            Rule::exit_command => Command::Exit,

            _ => unreachable!(),
        }
    }
}
