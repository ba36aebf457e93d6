// Server-rendered pages. Every dynamic value goes through `esc`.

use crate::db::models::common::parse_timestamp;
use crate::db::{Review, Tour, User};
use crate::notifications::email::html_escape as esc;

/// A review with its author, as shown on the tour page
pub struct ReviewCard<'a> {
    pub review: &'a Review,
    pub author: Option<&'a User>,
}

fn header(user: Option<&User>) -> String {
    let account = match user {
        Some(user) => format!(
            r#"<a class="nav__el nav__el--logout" href="/api/v1/users/logout">Log out</a>
            <a class="nav__el" href="/me"><img class="nav__user-img" src="/img/users/{photo}" alt="Photo of {name}"><span>{first}</span></a>"#,
            photo = esc(&user.photo),
            name = esc(&user.name),
            first = esc(user.first_name()),
        ),
        None => r#"<a class="nav__el" href="/login">Log in</a>"#.to_string(),
    };

    format!(
        r#"<header class="header">
        <nav class="nav nav--tours"><a class="nav__el" href="/">All tours</a></nav>
        <div class="header__logo"><img src="/img/logo-white.png" alt="Natours logo"></div>
        <nav class="nav nav--user">
            {account}
        </nav>
    </header>"#
    )
}

/// Wrap page content in the shared document shell.
pub fn layout(title: &str, user: Option<&User>, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <link rel="stylesheet" href="/css/style.css">
    <link rel="shortcut icon" type="image/png" href="/img/favicon.png">
    <title>Natours | {title}</title>
</head>
<body>
    {header}
    <main class="main">
        {content}
    </main>
    <footer class="footer">
        <div class="footer__logo"><img src="/img/logo-green.png" alt="Natours logo"></div>
        <p class="footer__copyright">&copy; Natours</p>
    </footer>
    <script src="/js/bundle.js"></script>
</body>
</html>"#,
        title = esc(title),
        header = header(user),
        content = content,
    )
}

fn month_year(timestamp: &str) -> String {
    parse_timestamp(timestamp)
        .map(|at| at.format("%B %Y").to_string())
        .unwrap_or_else(|| "Soon".to_string())
}

fn tour_card(tour: &Tour) -> String {
    let start = tour
        .get_start_dates()
        .first()
        .map(|d| month_year(d))
        .unwrap_or_else(|| "Soon".to_string());
    let location = tour
        .get_start_location()
        .and_then(|l| l.description)
        .unwrap_or_default();

    format!(
        r#"<div class="card">
            <div class="card__header">
                <div class="card__picture"><img class="card__picture-img" src="/img/tours/{cover}" alt="{name}"></div>
                <h3 class="heading-tertirary"><span>{name}</span></h3>
            </div>
            <div class="card__details">
                <h4 class="card__sub-heading">{difficulty} {duration}-day tour</h4>
                <p class="card__text">{summary}</p>
                <div class="card__data"><span>{location}</span></div>
                <div class="card__data"><span>{start}</span></div>
                <div class="card__data"><span>{stops} stops</span></div>
                <div class="card__data"><span>{group} people</span></div>
            </div>
            <div class="card__footer">
                <p><span class="card__footer-value">${price}</span> <span class="card__footer-text">per person</span></p>
                <p class="card__ratings"><span class="card__footer-value">{average}</span> <span class="card__footer-text">rating ({quantity})</span></p>
                <a class="btn btn--green btn--small" href="/tour/{slug}">Details</a>
            </div>
        </div>"#,
        cover = esc(&tour.image_cover),
        name = esc(&tour.name),
        difficulty = esc(&tour.difficulty),
        duration = tour.duration,
        summary = esc(&tour.summary),
        location = esc(&location),
        start = start,
        stops = tour.get_locations().len(),
        group = tour.max_group_size,
        price = tour.price,
        average = tour.ratings_average,
        quantity = tour.ratings_quantity,
        slug = esc(&tour.slug),
    )
}

/// Card grid of tours. Also used for the booked tours page.
pub fn overview(title: &str, tours: &[Tour], user: Option<&User>) -> String {
    let cards: String = tours.iter().map(tour_card).collect();
    let content = if tours.is_empty() {
        r#"<div class="card-container"><p>No tours to show yet.</p></div>"#.to_string()
    } else {
        format!(r#"<div class="card-container">{}</div>"#, cards)
    };
    layout(title, user, &content)
}

fn stars(rating: i64) -> String {
    (1..=5)
        .map(|i| {
            let state = if i <= rating { "active" } else { "inactive" };
            format!(r#"<span class="reviews__star reviews__star--{}">&#9733;</span>"#, state)
        })
        .collect()
}

pub fn tour_page(tour: &Tour, guides: &[User], reviews: &[ReviewCard<'_>], user: Option<&User>) -> String {
    let next_date = tour
        .get_start_dates()
        .first()
        .map(|d| month_year(d))
        .unwrap_or_else(|| "Soon".to_string());

    let guides_html: String = guides
        .iter()
        .map(|guide| {
            let label = if guide.role == "lead-guide" { "Lead guide" } else { "Tour guide" };
            format!(
                r#"<div class="overview-box__detail"><img class="overview-box__img" src="/img/users/{photo}" alt="{name}"><span class="overview-box__label">{label}</span><span class="overview-box__text">{name}</span></div>"#,
                photo = esc(&guide.photo),
                name = esc(&guide.name),
                label = label,
            )
        })
        .collect();

    let paragraphs: String = tour
        .description
        .as_deref()
        .unwrap_or_default()
        .split('\n')
        .filter(|p| !p.trim().is_empty())
        .map(|p| format!(r#"<p class="description__text">{}</p>"#, esc(p)))
        .collect();

    let pictures: String = tour
        .get_images()
        .iter()
        .enumerate()
        .map(|(i, img)| {
            format!(
                r#"<div class="picture-box"><img class="picture-box__img" src="/img/tours/{img}" alt="{name} {n}"></div>"#,
                img = esc(img),
                name = esc(&tour.name),
                n = i + 1,
            )
        })
        .collect();

    let reviews_html: String = reviews
        .iter()
        .map(|card| {
            let (photo, name) = card
                .author
                .map(|a| (a.photo.as_str(), a.name.as_str()))
                .unwrap_or(("default.jpg", "Former traveller"));
            format!(
                r#"<div class="reviews__card"><div class="reviews__avatar"><img class="reviews__avatar-img" src="/img/users/{photo}" alt="{name}"><h6 class="reviews__user">{name}</h6></div><p class="reviews__text">{text}</p><div class="reviews__rating">{stars}</div></div>"#,
                photo = esc(photo),
                name = esc(name),
                text = esc(&card.review.review),
                stars = stars(card.review.rating),
            )
        })
        .collect();

    let booking = match user {
        Some(_) => format!(
            r#"<button class="btn btn--green span-all-rows" id="book-tour" data-tour-id="{}">Book tour now!</button>"#,
            esc(&tour.id)
        ),
        None => r#"<a class="btn btn--green span-all-rows" href="/login">Log in to book tour</a>"#.to_string(),
    };

    let content = format!(
        r#"<section class="section-header">
            <div class="header__hero"><img class="header__hero-img" src="/img/tours/{cover}" alt="{name}"></div>
            <div class="heading-box">
                <h1 class="heading-primary"><span>{name} tour</span></h1>
                <div class="heading-box__group">
                    <div class="heading-box__detail"><span class="heading-box__text">{duration} days</span></div>
                    <div class="heading-box__detail"><span class="heading-box__text">{location}</span></div>
                </div>
            </div>
        </section>
        <section class="section-description">
            <div class="overview-box">
                <h2 class="heading-secondary ma-bt-lg">Quick facts</h2>
                <div class="overview-box__detail"><span class="overview-box__label">Next date</span><span class="overview-box__text">{next_date}</span></div>
                <div class="overview-box__detail"><span class="overview-box__label">Difficulty</span><span class="overview-box__text">{difficulty}</span></div>
                <div class="overview-box__detail"><span class="overview-box__label">Participants</span><span class="overview-box__text">{group} people</span></div>
                <div class="overview-box__detail"><span class="overview-box__label">Rating</span><span class="overview-box__text">{average} / 5</span></div>
                <h2 class="heading-secondary ma-bt-lg">Your tour guides</h2>
                {guides}
            </div>
            <div class="description-box">
                <h2 class="heading-secondary ma-bt-lg">About {name} tour</h2>
                {paragraphs}
            </div>
        </section>
        <section class="section-pictures">{pictures}</section>
        <section class="section-reviews"><div class="reviews">{reviews}</div></section>
        <section class="section-cta">
            <div class="cta">
                <h2 class="heading-secondary">What are you waiting for?</h2>
                <p class="cta__text">{duration} days. 1 adventure. Infinite memories. Make it yours today!</p>
                {booking}
            </div>
        </section>"#,
        cover = esc(&tour.image_cover),
        name = esc(&tour.name),
        duration = tour.duration,
        location = esc(
            &tour
                .get_start_location()
                .and_then(|l| l.description)
                .unwrap_or_default()
        ),
        next_date = next_date,
        difficulty = esc(&tour.difficulty),
        group = tour.max_group_size,
        average = tour.ratings_average,
        guides = guides_html,
        paragraphs = paragraphs,
        pictures = pictures,
        reviews = reviews_html,
        booking = booking,
    );

    layout(&format!("{} Tour", tour.name), user, &content)
}

pub fn login_page(error: Option<&str>) -> String {
    let alert = error
        .map(|msg| format!(r#"<div class="alert alert--error">{}</div>"#, esc(msg)))
        .unwrap_or_default();
    let content = format!(
        r#"<div class="login-form">
            <h2 class="heading-secondary ma-bt-lg">Log into your account</h2>
            {alert}
            <form class="form form--login" method="post" action="/login">
                <div class="form__group">
                    <label class="form__label" for="email">Email address</label>
                    <input class="form__input" id="email" name="email" type="email" placeholder="you@example.com" required>
                </div>
                <div class="form__group ma-bt-md">
                    <label class="form__label" for="password">Password</label>
                    <input class="form__input" id="password" name="password" type="password" placeholder="••••••••" required minlength="8">
                </div>
                <div class="form__group"><button class="btn btn--green">Login</button></div>
            </form>
        </div>"#
    );
    layout("Log into your account", None, &content)
}

pub fn account_page(user: &User, notice: Option<&str>) -> String {
    let alert = notice
        .map(|msg| format!(r#"<div class="alert alert--success">{}</div>"#, esc(msg)))
        .unwrap_or_default();
    let content = format!(
        r#"<div class="user-view">
            <nav class="user-view__menu">
                <ul class="side-nav">
                    <li class="side-nav--active"><a href="/me">Settings</a></li>
                    <li><a href="/my-tours">My bookings</a></li>
                </ul>
            </nav>
            <div class="user-view__content">
                <div class="user-view__form-container">
                    <h2 class="heading-secondary ma-bt-md">Your account settings</h2>
                    {alert}
                    <form class="form form-user-data" method="post" action="/submit-user-data">
                        <div class="form__group">
                            <label class="form__label" for="name">Name</label>
                            <input class="form__input" id="name" name="name" type="text" value="{name}" required>
                        </div>
                        <div class="form__group ma-bt-md">
                            <label class="form__label" for="email">Email address</label>
                            <input class="form__input" id="email" name="email" type="email" value="{email}" required>
                        </div>
                        <div class="form__group form__photo-upload">
                            <img class="form__user-photo" src="/img/users/{photo}" alt="User photo">
                        </div>
                        <div class="form__group right"><button class="btn btn--small btn--green">Save settings</button></div>
                    </form>
                </div>
            </div>
        </div>"#,
        alert = alert,
        name = esc(&user.name),
        email = esc(&user.email),
        photo = esc(&user.photo),
    );
    layout("Your account", Some(user), &content)
}

pub fn error_page(title: &str, message: &str) -> String {
    let content = format!(
        r#"<div class="error">
            <div class="error__title">
                <h2 class="heading-secondary heading-secondary--error">{title}</h2>
                <h2 class="error__emoji">&#128546; &#129327;</h2>
            </div>
            <div class="error__msg">{message}</div>
        </div>"#,
        title = esc(title),
        message = esc(message),
    );
    layout(title, None, &content)
}
