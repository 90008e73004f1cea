/*
 * Copyright (c) 2025 Craig Hamilton and Contributors.
 * Licensed under either of
 *  - Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> OR
 *  - MIT license <http://opensource.org/licenses/MIT>
 *  at your option.
 */

use std::io::{self, BufRead, Write};

use url::Url;

use crate::error::{FlickrdError, Result};

/// The steps that need a human at the terminal
pub(crate) trait Interaction {
    /// Shows the authorization url and returns the code the user pasted back
    fn verification_code(&mut self, authorize_url: &Url) -> Result<String>;

    /// Asks a yes/no question
    fn confirm(&mut self, question: &str) -> Result<bool>;
}

/// Reads answers from stdin
pub(crate) struct Console {
    assume_yes: bool,
}

impl Console {
    pub(crate) fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }

    fn read_line(prompt: &str) -> Result<String> {
        print!("{}", prompt);
        io::stdout().flush().map_err(FlickrdError::Terminal)?;
        let mut user_input = String::new();
        io::stdin()
            .lock()
            .read_line(&mut user_input)
            .map_err(FlickrdError::Terminal)?;
        Ok(user_input.trim().to_string())
    }
}

impl Interaction for Console {
    fn verification_code(&mut self, authorize_url: &Url) -> Result<String> {
        println!("Flickr authorization is required on first use. Open this address in a browser and allow access:");
        println!("{}", authorize_url.as_str());
        let code = Self::read_line("Enter the code shown after authorizing: ")?;
        if code.is_empty() {
            return Err(FlickrdError::Auth("no verification code entered".to_string()));
        }
        Ok(code)
    }

    fn confirm(&mut self, question: &str) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        let answer = Self::read_line(&format!("\n{} [Y/N]: ", question))?;
        Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
    }
}
