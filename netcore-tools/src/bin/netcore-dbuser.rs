use clap::{App, Arg};
use netcore::config::read_dataservice_user;

/// Prints the data-service username netcore would use: the contents of the
/// given `db_user` file, or the built-in default `pbsdata` if the path is
/// absent. Exit codes: `0` success, `1` the file exists but couldn't be read.
fn main() {
    let matches = App::new("netcore-dbuser")
        .version("0.1.0")
        .author("Bush Hammer Industries")
        .about("Resolves the data-service username the same way the server core does")
        .arg(
            Arg::with_name("DB_USER_FILE")
                .help("Path to server_priv/db_user; omit to use the built-in default")
                .required(false),
        )
        .get_matches();

    let path = matches.value_of("DB_USER_FILE");

    match read_dataservice_user(path) {
        Ok(user) => {
            println!("{}", user);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("netcore-dbuser: {}", e);
            std::process::exit(1);
        }
    }
}
