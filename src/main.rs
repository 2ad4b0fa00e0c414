use crossfill::find_fill;
use crossfill::render_grid;
use crossfill::Grid;
use std::fs;

const USAGE: &str = "usage: crossfill <structure-file> <word-list-file> [output-file]";

fn load_word_list(path: &str) -> Vec<String> {
    fs::read_to_string(path)
        .expect("Something went wrong reading the word list")
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

fn main() {
    let mut args = std::env::args().skip(1);
    let structure_path = args.next().expect(USAGE);
    let words_path = args.next().expect(USAGE);
    let output_path = args.next();

    let template =
        fs::read_to_string(&structure_path).expect("Something went wrong reading the structure");

    let grid = Grid::from_template(&template, &load_word_list(&words_path));

    match find_fill(&grid) {
        Ok(result) => {
            let display_grid = render_grid(&grid, &result.choices);

            println!("{:?}", result.statistics);
            println!("{}", display_grid);

            if let Some(output_path) = output_path {
                fs::write(&output_path, display_grid).expect("Unable to write file");
                println!("written fill to {}", output_path);
            }
        }
        Err(failure) => println!("No solution: {:?}", failure),
    }
}
