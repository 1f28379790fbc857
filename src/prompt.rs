use colored::Colorize;

pub struct Prompt {
    prefix: String,
}

impl Prompt {
    pub fn new() -> Self {
        let user = whoami::username();
        let host = whoami::fallible::hostname().unwrap_or_else(|_| String::from("localhost"));
        Self {
            prefix: format!("{}@{}", user, host),
        }
    }

    pub fn get_string(&self) -> String {
        format!("{}$ ", self.prefix.as_str().green())
    }

    pub fn display(&self) {
        print!("{}", self.get_string());
    }
}
